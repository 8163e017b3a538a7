//! Pin registry: ordered ownership of the display lines.
//!
//! The registry is either fully acquired or fully released. A failure part
//! way through [`PinRegistry::acquire_all`] gives back every line claimed so
//! far, in reverse order, before the error is returned.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::line::{LineId, LineProvider};
use crate::{Error, Result};

/// One output line and its last written state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    /// Hardware identifier.
    pub id: LineId,
    /// Index of the bit-string character that controls this line.
    pub position: usize,
    /// Last level written through the registry.
    pub state: bool,
}

struct Inner<P> {
    provider: P,
    lines: Vec<Line>,
    released: bool,
}

/// Owner of all display lines.
///
/// Every access to line state goes through one lock, held only for the
/// duration of the hardware access.
pub struct PinRegistry<P: LineProvider> {
    inner: Mutex<Inner<P>>,
    backend: String,
}

/// Rejects line lists that would break the registry invariants.
pub fn validate_ids(ids: &[LineId]) -> Result<()> {
    if ids.is_empty() {
        return Err(Error::InvalidConfig("no lines configured".to_string()));
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id) {
            return Err(Error::InvalidConfig(format!("line {} listed twice", id)));
        }
    }
    Ok(())
}

/// Claims one line and drives it low. Gives the claim back if configuration fails.
fn acquire_line<P: LineProvider>(provider: &mut P, id: LineId, label: &str) -> Result<()> {
    provider.claim(id, label)?;
    let configured = provider
        .set_output(id, false)
        .and_then(|()| provider.expose(id));
    if let Err(e) = configured {
        if let Err(free_err) = provider.free(id) {
            warn!("Failed to free GPIO {} after configuration error: {}", id, free_err);
        }
        return Err(e);
    }
    Ok(())
}

/// Turns a line off, hides it and frees it. Never stops on error.
fn release_line<P: LineProvider>(provider: &mut P, id: LineId) {
    if let Err(e) = provider.set_level(id, false) {
        warn!("Failed to turn off GPIO {}: {}", id, e);
    }
    if let Err(e) = provider.unexpose(id) {
        warn!("Failed to unexport GPIO {}: {}", id, e);
    }
    if let Err(e) = provider.free(id) {
        warn!("Failed to free GPIO {}: {}", id, e);
    }
}

impl<P: LineProvider> Inner<P> {
    fn check(&self, position: usize) -> Result<()> {
        if position >= self.lines.len() {
            return Err(Error::InvalidPosition {
                position,
                len: self.lines.len(),
            });
        }
        Ok(())
    }

    /// Live level if the backend can report it, otherwise the cached state.
    fn read(&mut self, position: usize) -> bool {
        let line = self.lines[position];
        match self.provider.level(line.id) {
            Ok(level) => level,
            Err(e) => {
                warn!("Failed to read GPIO {}, using cached state: {}", line.id, e);
                line.state
            }
        }
    }

    fn write(&mut self, position: usize, on: bool) -> Result<()> {
        let id = self.lines[position].id;
        self.provider.set_level(id, on)?;
        self.lines[position].state = on;
        Ok(())
    }

    fn teardown(&mut self) {
        if self.released {
            return;
        }
        for line in self.lines.iter_mut().rev() {
            release_line(&mut self.provider, line.id);
            line.state = false;
        }
        self.released = true;
        info!("Released {} GPIO lines", self.lines.len());
    }
}

impl<P: LineProvider> PinRegistry<P> {
    /// Claims every line in order, configuring each as an output driven low.
    ///
    /// On failure at line `k`, lines `k-1` down to `0` are released before the
    /// error is returned, so nothing stays claimed.
    pub fn acquire_all(mut provider: P, ids: &[LineId], label: &str) -> Result<Self> {
        validate_ids(ids)?;

        let mut lines: Vec<Line> = Vec::with_capacity(ids.len());
        for (position, &id) in ids.iter().enumerate() {
            if let Err(e) = acquire_line(&mut provider, id, label) {
                warn!(
                    "Failed to acquire GPIO {} (position {}): {}. Rolling back {} lines",
                    id,
                    position,
                    e,
                    lines.len()
                );
                for line in lines.iter().rev() {
                    release_line(&mut provider, line.id);
                }
                return Err(e);
            }
            debug!("Acquired GPIO {} at position {}", id, position);
            lines.push(Line {
                id,
                position,
                state: false,
            });
        }

        let backend = provider.name().to_string();
        info!("Acquired {} GPIO lines via {}", lines.len(), backend);
        Ok(Self {
            inner: Mutex::new(Inner {
                provider,
                lines,
                released: false,
            }),
            backend,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Turns every line off and frees it, from the last position to the first.
    ///
    /// Individual step failures are logged and do not interrupt the teardown.
    pub fn release_all(self) {
        self.lock().teardown();
    }

    /// Sets the line at `position`.
    pub fn set(&self, position: usize, on: bool) -> Result<()> {
        let mut inner = self.lock();
        inner.check(position)?;
        inner.write(position, on)
    }

    /// Returns the live level of the line at `position`.
    ///
    /// Falls back to the last written state when the backend cannot be read.
    pub fn get(&self, position: usize) -> Result<bool> {
        let mut inner = self.lock();
        inner.check(position)?;
        Ok(inner.read(position))
    }

    /// Reads every line under a single lock acquisition.
    pub fn snapshot(&self) -> Vec<bool> {
        let mut inner = self.lock();
        (0..inner.lines.len()).map(|p| inner.read(p)).collect()
    }

    /// Sets positions `0..levels.len()` under a single lock acquisition.
    ///
    /// Lines past the end of `levels` keep their state. Every position is
    /// attempted; the first backend error is returned.
    pub fn apply(&self, levels: &[bool]) -> Result<()> {
        let mut inner = self.lock();
        if let Some(last) = levels.len().checked_sub(1) {
            inner.check(last)?;
        }

        let mut first_err = None;
        for (position, &on) in levels.iter().enumerate() {
            if let Err(e) = inner.write(position, on) {
                warn!("Failed to set line at position {}: {}", position, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    /// Always false for an acquired registry.
    pub fn is_empty(&self) -> bool {
        self.lock().lines.is_empty()
    }

    /// Line identifiers in position order.
    pub fn ids(&self) -> Vec<LineId> {
        self.lock().lines.iter().map(|l| l.id).collect()
    }

    /// Copy of every line with its cached state.
    pub fn lines(&self) -> Vec<Line> {
        self.lock().lines.clone()
    }

    /// Name of the backend the lines were acquired through.
    pub fn backend(&self) -> &str {
        &self.backend
    }
}

impl<P: LineProvider> Drop for PinRegistry<P> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !inner.released {
            debug!("Registry dropped without release_all, releasing lines");
            inner.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::{LineEvent, SimulatedProvider};
    use crate::DEFAULT_LINES;

    fn acquire(sim: &SimulatedProvider) -> PinRegistry<SimulatedProvider> {
        PinRegistry::acquire_all(sim.clone(), &DEFAULT_LINES, "test").unwrap()
    }

    #[test]
    fn test_acquire_configures_every_line() {
        let sim = SimulatedProvider::new();
        let registry = acquire(&sim);

        assert_eq!(registry.len(), DEFAULT_LINES.len());
        assert_eq!(registry.ids(), DEFAULT_LINES.to_vec());
        for (position, line) in registry.lines().iter().enumerate() {
            assert_eq!(line.position, position);
            assert!(!line.state);
            assert!(sim.is_exposed(line.id));
            assert_eq!(sim.level_of(line.id), Some(false));
        }
    }

    #[test]
    fn test_claim_failure_rolls_back_at_every_position() {
        for k in 0..DEFAULT_LINES.len() {
            let sim = SimulatedProvider::new();
            sim.mark_busy(DEFAULT_LINES[k]);

            let result = PinRegistry::acquire_all(sim.clone(), &DEFAULT_LINES, "test");
            assert!(matches!(result, Err(Error::LineBusy { id }) if id == DEFAULT_LINES[k]));
            assert!(sim.claimed().is_empty(), "lines leaked when failing at {}", k);

            // Freed in reverse order of claiming.
            let freed: Vec<LineId> = sim
                .events()
                .into_iter()
                .filter_map(|e| match e {
                    LineEvent::Free(id) => Some(id),
                    _ => None,
                })
                .collect();
            let expected: Vec<LineId> = DEFAULT_LINES[..k].iter().rev().copied().collect();
            assert_eq!(freed, expected);
        }
    }

    #[test]
    fn test_configure_failure_frees_failing_line() {
        let sim = SimulatedProvider::new();
        sim.fail_set_output(DEFAULT_LINES[3]);
        assert!(PinRegistry::acquire_all(sim.clone(), &DEFAULT_LINES, "test").is_err());
        assert!(sim.claimed().is_empty());

        let sim = SimulatedProvider::new();
        sim.fail_expose(DEFAULT_LINES[6]);
        assert!(PinRegistry::acquire_all(sim.clone(), &DEFAULT_LINES, "test").is_err());
        assert!(sim.claimed().is_empty());
    }

    #[test]
    fn test_unavailable_line_rolls_back() {
        let sim = SimulatedProvider::new();
        sim.fail_claim(DEFAULT_LINES[1]);
        let result = PinRegistry::acquire_all(sim.clone(), &DEFAULT_LINES, "test");
        assert!(matches!(result, Err(Error::LineUnavailable { .. })));
        assert!(sim.claimed().is_empty());
    }

    #[test]
    fn test_release_order_is_reverse() {
        let sim = SimulatedProvider::new();
        let registry = acquire(&sim);
        registry.set(2, true).unwrap();
        let before = sim.events().len();

        registry.release_all();

        let teardown = sim.events()[before..].to_vec();
        let expected: Vec<LineEvent> = DEFAULT_LINES
            .iter()
            .rev()
            .flat_map(|&id| {
                [
                    LineEvent::SetLevel(id, false),
                    LineEvent::Unexpose(id),
                    LineEvent::Free(id),
                ]
            })
            .collect();
        assert_eq!(teardown, expected);
        assert!(sim.claimed().is_empty());
    }

    #[test]
    fn test_release_continues_after_step_failure() {
        let sim = SimulatedProvider::new();
        let registry = acquire(&sim);
        sim.fail_unexpose(DEFAULT_LINES[4]);
        sim.fail_set_level(DEFAULT_LINES[0]);

        registry.release_all();
        assert!(sim.claimed().is_empty());
    }

    #[test]
    fn test_drop_releases_lines() {
        let sim = SimulatedProvider::new();
        {
            let _registry = acquire(&sim);
            assert_eq!(sim.claimed().len(), DEFAULT_LINES.len());
        }
        assert!(sim.claimed().is_empty());
    }

    #[test]
    fn test_release_runs_once() {
        let sim = SimulatedProvider::new();
        acquire(&sim).release_all();
        let frees = sim
            .events()
            .iter()
            .filter(|e| matches!(e, LineEvent::Free(_)))
            .count();
        assert_eq!(frees, DEFAULT_LINES.len());
    }

    #[test]
    fn test_set_and_get() {
        let sim = SimulatedProvider::new();
        let registry = acquire(&sim);
        registry.set(0, true).unwrap();
        assert!(registry.get(0).unwrap());
        assert_eq!(sim.level_of(DEFAULT_LINES[0]), Some(true));
        registry.set(0, false).unwrap();
        assert!(!registry.get(0).unwrap());
    }

    #[test]
    fn test_invalid_position() {
        let sim = SimulatedProvider::new();
        let registry = acquire(&sim);
        assert!(matches!(
            registry.set(7, true),
            Err(Error::InvalidPosition { position: 7, len: 7 })
        ));
        assert!(registry.get(100).is_err());
        assert!(registry.apply(&[true; 8]).is_err());
    }

    #[test]
    fn test_get_reads_live_level() {
        let sim = SimulatedProvider::new();
        let registry = acquire(&sim);
        sim.drive(DEFAULT_LINES[5], true);
        assert!(registry.get(5).unwrap());
        assert!(!registry.lines()[5].state);
    }

    #[test]
    fn test_get_falls_back_to_cache() {
        let sim = SimulatedProvider::new();
        let registry = acquire(&sim);
        registry.set(1, true).unwrap();
        sim.drive(DEFAULT_LINES[1], false);
        sim.fail_level(DEFAULT_LINES[1]);
        assert!(registry.get(1).unwrap());
    }

    #[test]
    fn test_apply_prefix_only() {
        let sim = SimulatedProvider::new();
        let registry = acquire(&sim);
        registry.apply(&[true; 7]).unwrap();
        registry.apply(&[false, false]).unwrap();
        assert_eq!(
            registry.snapshot(),
            vec![false, false, true, true, true, true, true]
        );
    }

    #[test]
    fn test_rejects_bad_line_lists() {
        let sim = SimulatedProvider::new();
        assert!(matches!(
            PinRegistry::acquire_all(sim.clone(), &[], "test"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            PinRegistry::acquire_all(sim.clone(), &[4, 5, 4], "test"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(sim.events().is_empty());
    }
}
