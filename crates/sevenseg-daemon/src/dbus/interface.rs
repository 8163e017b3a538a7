//! D-Bus interface implementation using zbus.
//!
//! Provides the `org.sevenseg.Device1` interface.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::fdo::DBusProxy;
use zbus::message::Header;
use zbus::{interface, Connection};

use super::{BUS_NAME, OBJECT_PATH};
use crate::config::DbusBusType;
use crate::lifecycle::{Published, Publisher};
use crate::state::{AppState, SessionError};

/// D-Bus interface implementation for the display device.
pub struct DeviceInterface {
    state: Arc<AppState>,
    shutdown_tx: mpsc::Sender<()>,
}

impl DeviceInterface {
    /// Creates a new D-Bus interface.
    pub fn new(state: Arc<AppState>, shutdown_tx: mpsc::Sender<()>) -> Self {
        Self { state, shutdown_tx }
    }
}

/// Maps a session error to the D-Bus error returned to the caller.
fn to_fdo(err: SessionError) -> zbus::fdo::Error {
    match &err {
        SessionError::Unknown(_) => zbus::fdo::Error::InvalidArgs(err.to_string()),
        SessionError::Device(sevenseg_hw::Error::BoundaryTransfer) => {
            zbus::fdo::Error::IOError(err.to_string())
        }
        SessionError::Device(_) => zbus::fdo::Error::Failed(err.to_string()),
    }
}

#[interface(name = "org.sevenseg.Device1")]
impl DeviceInterface {
    /// Opens a session and returns its handle.
    ///
    /// The session is closed automatically if the caller leaves the bus.
    fn open(&self, #[zbus(header)] header: Header<'_>) -> u32 {
        let owner = header.sender().map(|sender| sender.as_str());
        let id = self.state.open(owner);
        debug!("D-Bus: Open() -> {}", id);
        id
    }

    /// Reads the current line states once per session.
    ///
    /// Returns one character per line plus a NUL, or an empty array once the
    /// session has already been read.
    fn read(&self, session: u32, length: u32) -> zbus::fdo::Result<Vec<u8>> {
        let data = self
            .state
            .read(session, length as usize)
            .map_err(to_fdo)?;
        debug!("D-Bus: Read({}, {}) -> {} bytes", session, length, data.len());
        Ok(data)
    }

    /// Sets lines from a bit string. Returns the number of bytes accepted.
    fn write(&self, session: u32, data: Vec<u8>, length: u32) -> zbus::fdo::Result<u32> {
        let accepted = self
            .state
            .write(session, &data, length as usize)
            .map_err(to_fdo)?;
        debug!("D-Bus: Write({}, {} bytes)", session, length);
        Ok(accepted as u32)
    }

    /// Discards a session.
    fn close(&self, session: u32) -> zbus::fdo::Result<()> {
        self.state.close(session).map_err(to_fdo)?;
        debug!("D-Bus: Close({})", session);
        Ok(())
    }

    /// Shuts down the daemon.
    async fn quit(&self) -> zbus::fdo::Result<()> {
        info!("D-Bus: Quit requested");
        self.shutdown_tx
            .send(())
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(())
    }

    // Properties

    /// Published device name.
    #[zbus(property)]
    fn name(&self) -> String {
        self.state.name().to_string()
    }

    /// Number of lines, and characters per record.
    #[zbus(property)]
    fn line_count(&self) -> u32 {
        self.state.line_ids().len() as u32
    }

    /// GPIO numbers in segment order.
    #[zbus(property)]
    fn lines(&self) -> Vec<u32> {
        self.state.line_ids()
    }

    /// GPIO backend name.
    #[zbus(property)]
    fn backend(&self) -> String {
        self.state.backend().to_string()
    }

    /// Number of open sessions.
    #[zbus(property)]
    fn open_sessions(&self) -> u32 {
        self.state.session_count() as u32
    }
}

fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Connects to the appropriate D-Bus bus based on configuration.
async fn connect_to_bus(bus_type: DbusBusType) -> anyhow::Result<(Connection, &'static str)> {
    match bus_type {
        DbusBusType::Session => {
            let conn = Connection::session()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to session bus: {}", e))?;
            Ok((conn, "session"))
        }
        DbusBusType::System => {
            let conn = Connection::system()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to system bus: {}", e))?;
            Ok((conn, "system"))
        }
        DbusBusType::Auto if running_as_root() => {
            let conn = Connection::system()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to system bus: {}", e))?;
            Ok((conn, "system"))
        }
        DbusBusType::Auto => {
            // Try session bus first, fall back to system bus
            match Connection::session().await {
                Ok(conn) => Ok((conn, "session")),
                Err(session_err) => {
                    warn!(
                        "Session bus unavailable ({}), trying system bus",
                        session_err
                    );
                    let conn = Connection::system().await.map_err(|system_err| {
                        anyhow::anyhow!(
                            "Failed to connect to any D-Bus: session={}, system={}",
                            session_err,
                            system_err
                        )
                    })?;
                    Ok((conn, "system"))
                }
            }
        }
    }
}

/// A published device. Must be unpublished before the lines are released.
pub struct Registration {
    connection: Connection,
    bus: &'static str,
    owner_watch: JoinHandle<()>,
}

/// Closes the sessions of callers that leave the bus.
fn watch_owners(connection: &Connection, state: Arc<AppState>) -> JoinHandle<()> {
    let connection = connection.clone();
    tokio::spawn(async move {
        let proxy = match DBusProxy::new(&connection).await {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!("Cannot watch for disconnected clients: {}", e);
                return;
            }
        };
        let mut changes = match proxy.receive_name_owner_changed().await {
            Ok(changes) => changes,
            Err(e) => {
                warn!("Cannot subscribe to NameOwnerChanged: {}", e);
                return;
            }
        };
        while let Some(signal) = changes.next().await {
            let Ok(args) = signal.args() else {
                continue;
            };
            // A unique name losing its owner means that client disconnected.
            let name = args.name().as_str();
            if name.starts_with(':') && args.new_owner().is_none() {
                state.close_owner(name);
            }
        }
    })
}

/// Publishes the device on D-Bus.
///
/// If a later step fails, the steps that already succeeded are undone
/// before the error is returned.
pub async fn publish(
    state: Arc<AppState>,
    shutdown_tx: mpsc::Sender<()>,
    bus_type: DbusBusType,
) -> sevenseg_hw::Result<Registration> {
    let interface = DeviceInterface::new(Arc::clone(&state), shutdown_tx);

    let (connection, bus) = connect_to_bus(bus_type)
        .await
        .map_err(|e| sevenseg_hw::Error::Registration(e.to_string()))?;

    connection
        .object_server()
        .at(OBJECT_PATH, interface)
        .await
        .map_err(|e| {
            sevenseg_hw::Error::Registration(format!("Failed to register object: {}", e))
        })?;

    if let Err(e) = connection.request_name(BUS_NAME).await {
        if let Err(remove_err) = connection
            .object_server()
            .remove::<DeviceInterface, _>(OBJECT_PATH)
            .await
        {
            warn!("Failed to remove object after name request error: {}", remove_err);
        }
        return Err(sevenseg_hw::Error::Registration(format!(
            "Failed to request bus name: {}",
            e
        )));
    }

    let owner_watch = watch_owners(&connection, state);

    info!("D-Bus service registered at {} on {} bus", BUS_NAME, bus);
    Ok(Registration {
        connection,
        bus,
        owner_watch,
    })
}

/// Publishes on the configured D-Bus bus.
pub struct DbusPublisher {
    pub bus: DbusBusType,
}

impl Publisher for DbusPublisher {
    type Registration = Registration;

    async fn publish(
        &self,
        state: Arc<AppState>,
        shutdown_tx: mpsc::Sender<()>,
    ) -> sevenseg_hw::Result<Registration> {
        publish(state, shutdown_tx, self.bus).await
    }
}

impl Published for Registration {
    async fn unpublish(self) {
        // The watcher holds the state; wait until it is dropped.
        self.owner_watch.abort();
        let _ = self.owner_watch.await;
        if let Err(e) = self.connection.release_name(BUS_NAME).await {
            warn!("Failed to release bus name {}: {}", BUS_NAME, e);
        }
        if let Err(e) = self
            .connection
            .object_server()
            .remove::<DeviceInterface, _>(OBJECT_PATH)
            .await
        {
            warn!("Failed to remove object {}: {}", OBJECT_PATH, e);
        }
        info!("D-Bus service unregistered from {} bus", self.bus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            to_fdo(SessionError::Unknown(3)),
            zbus::fdo::Error::InvalidArgs(_)
        ));
        assert!(matches!(
            to_fdo(SessionError::Device(sevenseg_hw::Error::BoundaryTransfer)),
            zbus::fdo::Error::IOError(_)
        ));
        assert!(matches!(
            to_fdo(SessionError::Device(sevenseg_hw::Error::LineBusy { id: 17 })),
            zbus::fdo::Error::Failed(_)
        ));
    }
}
