//! In-memory line backend.
//!
//! Used when no GPIO hardware is present and by tests. Clones share state,
//! so a test can keep one handle while the registry owns another.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{LineId, LineProvider};
use crate::{Error, Result};

/// A successful backend operation, recorded in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    Claim(LineId),
    SetOutput(LineId, bool),
    Expose(LineId),
    SetLevel(LineId, bool),
    Unexpose(LineId),
    Free(LineId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Step {
    Claim,
    SetOutput,
    Expose,
    SetLevel,
    Level,
    Unexpose,
    Free,
}

#[derive(Debug, Default)]
struct SimLine {
    output: bool,
    exposed: bool,
    level: bool,
}

#[derive(Debug, Default)]
struct SimState {
    lines: BTreeMap<LineId, SimLine>,
    busy: HashSet<LineId>,
    failures: HashSet<(LineId, Step)>,
    events: Vec<LineEvent>,
}

/// Simulated GPIO controller with failure injection.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProvider {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedProvider {
    /// Creates a controller where every line is free.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks a line as held by another consumer.
    pub fn mark_busy(&self, id: LineId) {
        self.lock().busy.insert(id);
    }

    /// Makes claiming `id` fail as if the line did not exist.
    pub fn fail_claim(&self, id: LineId) {
        self.lock().failures.insert((id, Step::Claim));
    }

    /// Makes configuring `id` as an output fail.
    pub fn fail_set_output(&self, id: LineId) {
        self.lock().failures.insert((id, Step::SetOutput));
    }

    /// Makes exposing `id` fail.
    pub fn fail_expose(&self, id: LineId) {
        self.lock().failures.insert((id, Step::Expose));
    }

    /// Makes driving `id` fail.
    pub fn fail_set_level(&self, id: LineId) {
        self.lock().failures.insert((id, Step::SetLevel));
    }

    /// Makes reading the level of `id` fail.
    pub fn fail_level(&self, id: LineId) {
        self.lock().failures.insert((id, Step::Level));
    }

    /// Makes unexposing `id` fail.
    pub fn fail_unexpose(&self, id: LineId) {
        self.lock().failures.insert((id, Step::Unexpose));
    }

    /// Forces the physical level of a line, bypassing the output driver.
    pub fn drive(&self, id: LineId, level: bool) {
        if let Some(line) = self.lock().lines.get_mut(&id) {
            line.level = level;
        }
    }

    /// Returns every successful operation so far.
    pub fn events(&self) -> Vec<LineEvent> {
        self.lock().events.clone()
    }

    /// Returns the currently claimed lines in ascending order.
    pub fn claimed(&self) -> Vec<LineId> {
        self.lock().lines.keys().copied().collect()
    }

    /// Returns true if the line is claimed and exposed.
    pub fn is_exposed(&self, id: LineId) -> bool {
        self.lock().lines.get(&id).is_some_and(|l| l.exposed)
    }

    /// Returns the physical level of a claimed line.
    pub fn level_of(&self, id: LineId) -> Option<bool> {
        self.lock().lines.get(&id).map(|l| l.level)
    }
}

impl SimState {
    fn check(&self, id: LineId, step: Step) -> Result<()> {
        if self.failures.contains(&(id, step)) {
            return Err(Error::LineUnavailable {
                id,
                reason: format!("injected {:?} failure", step),
            });
        }
        Ok(())
    }

    fn line_mut(&mut self, id: LineId) -> Result<&mut SimLine> {
        self.lines.get_mut(&id).ok_or_else(|| Error::LineUnavailable {
            id,
            reason: "line not claimed".to_string(),
        })
    }
}

impl LineProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    fn claim(&mut self, id: LineId, label: &str) -> Result<()> {
        let mut state = self.lock();
        if state.busy.contains(&id) || state.lines.contains_key(&id) {
            return Err(Error::LineBusy { id });
        }
        state.check(id, Step::Claim)?;
        state.lines.insert(id, SimLine::default());
        state.events.push(LineEvent::Claim(id));
        debug!("sim: claimed line {} for {}", id, label);
        Ok(())
    }

    fn set_output(&mut self, id: LineId, level: bool) -> Result<()> {
        let mut state = self.lock();
        state.check(id, Step::SetOutput)?;
        let line = state.line_mut(id)?;
        line.output = true;
        line.level = level;
        state.events.push(LineEvent::SetOutput(id, level));
        Ok(())
    }

    fn expose(&mut self, id: LineId) -> Result<()> {
        let mut state = self.lock();
        state.check(id, Step::Expose)?;
        state.line_mut(id)?.exposed = true;
        state.events.push(LineEvent::Expose(id));
        Ok(())
    }

    fn set_level(&mut self, id: LineId, level: bool) -> Result<()> {
        let mut state = self.lock();
        state.check(id, Step::SetLevel)?;
        let line = state.line_mut(id)?;
        if !line.output {
            return Err(Error::LineUnavailable {
                id,
                reason: "line is not an output".to_string(),
            });
        }
        line.level = level;
        state.events.push(LineEvent::SetLevel(id, level));
        Ok(())
    }

    fn level(&mut self, id: LineId) -> Result<bool> {
        let mut state = self.lock();
        state.check(id, Step::Level)?;
        Ok(state.line_mut(id)?.level)
    }

    fn unexpose(&mut self, id: LineId) -> Result<()> {
        let mut state = self.lock();
        state.check(id, Step::Unexpose)?;
        state.line_mut(id)?.exposed = false;
        state.events.push(LineEvent::Unexpose(id));
        Ok(())
    }

    fn free(&mut self, id: LineId) -> Result<()> {
        let mut state = self.lock();
        state.check(id, Step::Free)?;
        if state.lines.remove(&id).is_none() {
            return Err(Error::LineUnavailable {
                id,
                reason: "line not claimed".to_string(),
            });
        }
        state.events.push(LineEvent::Free(id));
        debug!("sim: freed line {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_twice_is_busy() {
        let mut sim = SimulatedProvider::new();
        sim.claim(4, "test").unwrap();
        assert!(matches!(sim.claim(4, "test"), Err(Error::LineBusy { id: 4 })));
    }

    #[test]
    fn test_set_level_requires_output() {
        let mut sim = SimulatedProvider::new();
        sim.claim(4, "test").unwrap();
        assert!(sim.set_level(4, true).is_err());
        sim.set_output(4, false).unwrap();
        sim.set_level(4, true).unwrap();
        assert_eq!(sim.level_of(4), Some(true));
    }

    #[test]
    fn test_clones_share_state() {
        let observer = SimulatedProvider::new();
        let mut owner = observer.clone();
        owner.claim(9, "test").unwrap();
        assert_eq!(observer.claimed(), vec![9]);
        assert_eq!(observer.events(), vec![LineEvent::Claim(9)]);
    }
}
