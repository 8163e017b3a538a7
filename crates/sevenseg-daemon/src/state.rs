//! Device state shared by the D-Bus handlers.
//!
//! Sessions are keyed by a handle returned from open. The table lock only
//! covers lookup, insert and remove; each session has its own lock for reads.
//! A session remembers the bus name that opened it so it can be dropped when
//! that caller disconnects without closing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sevenseg_hw::{
    LineId, LineProvider, SegmentDevice, Session, SimulatedProvider, SysfsProvider,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Backend, Config};

/// Backend chosen at runtime from the configuration.
pub type Provider = Box<dyn LineProvider>;

/// Errors from session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No open session has this handle.
    #[error("Unknown session {0}")]
    Unknown(u32),

    /// The device rejected the operation.
    #[error(transparent)]
    Device(#[from] sevenseg_hw::Error),
}

/// Creates the line backend named in the configuration.
pub fn create_provider(config: &Config) -> Provider {
    match config.device.backend {
        Backend::Sysfs => Box::new(
            SysfsProvider::new(&config.sysfs.root)
                .with_export_timeout(Duration::from_millis(config.sysfs.export_timeout_ms)),
        ),
        Backend::Simulated => Box::new(SimulatedProvider::new()),
    }
}

type SharedSession = Arc<Mutex<Session<Provider>>>;

struct OpenSession {
    owner: Option<String>,
    session: SharedSession,
}

/// Published device and its open sessions.
pub struct AppState {
    name: String,
    device: SegmentDevice<Provider>,
    sessions: Mutex<HashMap<u32, OpenSession>>,
    next_session: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AppState {
    /// Creates state for a device with no open sessions.
    pub fn new(device: SegmentDevice<Provider>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            device,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU32::new(1),
        }
    }

    fn session(&self, id: u32) -> Result<SharedSession, SessionError> {
        lock(&self.sessions)
            .get(&id)
            .map(|open| Arc::clone(&open.session))
            .ok_or(SessionError::Unknown(id))
    }

    /// Opens a session for `owner` and returns its handle.
    ///
    /// Handles wrap around at `u32::MAX`. Zero and handles still in use are
    /// skipped.
    pub fn open(&self, owner: Option<&str>) -> u32 {
        let session = Arc::new(Mutex::new(self.device.open()));
        let mut sessions = lock(&self.sessions);
        let id = loop {
            let id = self.next_session.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !sessions.contains_key(&id) {
                break id;
            }
        };
        sessions.insert(
            id,
            OpenSession {
                owner: owner.map(str::to_string),
                session,
            },
        );
        debug!("Session {} opened by {}", id, owner.unwrap_or("(unknown)"));
        id
    }

    /// Reads the session's record. An empty result means end-of-data.
    pub fn read(&self, id: u32, length: usize) -> Result<Vec<u8>, SessionError> {
        let session = self.session(id)?;
        let mut out = Vec::with_capacity(self.device.record_len());
        lock(&session).read(&mut out, length)?;
        Ok(out)
    }

    /// Writes a bit string through the session. Returns the accepted count.
    pub fn write(&self, id: u32, data: &[u8], length: usize) -> Result<usize, SessionError> {
        let session = self.session(id)?;
        let accepted = lock(&session).write(data, length)?;
        Ok(accepted)
    }

    /// Discards a session.
    pub fn close(&self, id: u32) -> Result<(), SessionError> {
        let OpenSession { session, .. } = lock(&self.sessions)
            .remove(&id)
            .ok_or(SessionError::Unknown(id))?;
        // A concurrent read may still hold the session; it is dropped after.
        if let Ok(session) = Arc::try_unwrap(session) {
            session.into_inner().unwrap_or_else(PoisonError::into_inner).close();
        }
        debug!("Session {} closed", id);
        Ok(())
    }

    /// Discards every session opened by `owner`. Returns how many there were.
    pub fn close_owner(&self, owner: &str) -> usize {
        let ids: Vec<u32> = lock(&self.sessions)
            .iter()
            .filter(|(_, open)| open.owner.as_deref() == Some(owner))
            .map(|(&id, _)| id)
            .collect();
        let count = ids.into_iter().filter(|&id| self.close(id).is_ok()).count();
        if count > 0 {
            info!("Closed {} sessions left open by {}", count, owner);
        }
        count
    }

    /// Discards every session. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let sessions: Vec<_> = lock(&self.sessions).drain().collect();
        let count = sessions.len();
        drop(sessions);
        if count > 0 {
            info!("Closed {} open sessions", count);
        }
        count
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Published device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device.
    pub fn device(&self) -> &SegmentDevice<Provider> {
        &self.device
    }

    /// Line identifiers in position order.
    pub fn line_ids(&self) -> Vec<LineId> {
        self.device.registry().ids()
    }

    /// Backend name.
    pub fn backend(&self) -> &str {
        self.device.registry().backend()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sevenseg_hw::{PinRegistry, DEFAULT_LINES};

    fn state() -> (SimulatedProvider, AppState) {
        let sim = SimulatedProvider::new();
        let provider: Provider = Box::new(sim.clone());
        let registry = PinRegistry::acquire_all(provider, &DEFAULT_LINES, "test").unwrap();
        let device = SegmentDevice::new(Arc::new(registry));
        (sim, AppState::new(device, "sevenseg"))
    }

    #[test]
    fn test_session_lifecycle() {
        let (_sim, state) = state();
        let id = state.open(None);
        assert_eq!(state.session_count(), 1);

        assert_eq!(state.write(id, b"1010110", 7).unwrap(), 7);
        assert_eq!(state.read(id, 8).unwrap(), b"1010110\0".to_vec());
        assert!(state.read(id, 8).unwrap().is_empty());

        state.close(id).unwrap();
        assert_eq!(state.session_count(), 0);
        assert!(matches!(state.read(id, 8), Err(SessionError::Unknown(_))));
    }

    #[test]
    fn test_sessions_are_independent() {
        let (_sim, state) = state();
        let first = state.open(None);
        let second = state.open(None);
        assert_ne!(first, second);

        state.read(first, 8).unwrap();
        assert_eq!(state.read(second, 8).unwrap().len(), 8);
    }

    #[test]
    fn test_short_source_faults() {
        let (sim, state) = state();
        let id = state.open(None);
        let before = sim.events().len();
        assert!(matches!(
            state.write(id, b"11", 7),
            Err(SessionError::Device(sevenseg_hw::Error::BoundaryTransfer))
        ));
        assert_eq!(sim.events().len(), before);
    }

    #[test]
    fn test_unknown_session() {
        let (_sim, state) = state();
        assert!(matches!(state.close(42), Err(SessionError::Unknown(42))));
        assert!(state.write(42, b"1", 1).is_err());
    }

    #[test]
    fn test_close_all() {
        let (_sim, state) = state();
        state.open(None);
        state.open(None);
        assert_eq!(state.close_all(), 2);
        assert_eq!(state.session_count(), 0);
    }

    #[test]
    fn test_close_owner_keeps_other_callers() {
        let (_sim, state) = state();
        let gone = state.open(Some(":1.7"));
        state.open(Some(":1.7"));
        let other = state.open(Some(":1.8"));
        let anonymous = state.open(None);

        assert_eq!(state.close_owner(":1.7"), 2);
        assert_eq!(state.session_count(), 2);
        assert!(matches!(state.read(gone, 8), Err(SessionError::Unknown(_))));
        assert_eq!(state.read(other, 8).unwrap().len(), 8);
        assert_eq!(state.read(anonymous, 8).unwrap().len(), 8);
        assert_eq!(state.close_owner(":1.7"), 0);
    }

    #[test]
    fn test_handle_wrap_skips_live_sessions() {
        let (_sim, state) = state();
        let first = state.open(None);
        assert_eq!(first, 1);
        state.next_session.store(u32::MAX, Ordering::Relaxed);

        let last = state.open(None);
        assert_eq!(last, u32::MAX);
        // Wraps past 0 and the live handle 1.
        let wrapped = state.open(None);
        assert_eq!(wrapped, 2);
        assert_eq!(state.session_count(), 3);

        state.write(first, b"1", 1).unwrap();
        assert_eq!(state.read(first, 8).unwrap()[0], b'1');
    }

    #[test]
    fn test_accessors() {
        let (_sim, state) = state();
        assert_eq!(state.name(), "sevenseg");
        assert_eq!(state.backend(), "simulated");
        assert_eq!(state.line_ids(), DEFAULT_LINES.to_vec());
        assert_eq!(state.device().record_len(), 8);
    }

    #[test]
    fn test_create_provider() {
        let mut config = Config::default();
        config.device.backend = Backend::Simulated;
        assert_eq!(create_provider(&config).name(), "simulated");
        config.device.backend = Backend::Sysfs;
        assert_eq!(create_provider(&config).name(), "sysfs");
    }
}
