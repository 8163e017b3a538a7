//! D-Bus client library for communicating with the seven-segment daemon.
//!
//! Wraps the device's open/read/write/close calls and adds whole-display
//! helpers on top of them.

use anyhow::{Context, Result};
use sevenseg_hw::{Segment, SegmentPattern};
use tracing::{debug, warn};
use zbus::{proxy, Connection};

/// Well-known bus name of the daemon.
const BUS_NAME: &str = "org.sevenseg.Device";

/// D-Bus bus type selection.
#[derive(Debug, Clone, Copy, Default)]
pub enum BusType {
    /// Session bus (user session).
    Session,
    /// System bus (system-wide).
    System,
    /// Try session first, fall back to system.
    #[default]
    Auto,
}

/// D-Bus proxy for the display device.
#[proxy(
    interface = "org.sevenseg.Device1",
    default_service = "org.sevenseg.Device",
    default_path = "/org/sevenseg/Device"
)]
trait Device1 {
    /// Opens a session and returns its handle.
    fn open(&self) -> zbus::Result<u32>;

    /// Reads the line states once per session.
    fn read(&self, session: u32, length: u32) -> zbus::Result<Vec<u8>>;

    /// Sets lines from a bit string.
    fn write(&self, session: u32, data: &[u8], length: u32) -> zbus::Result<u32>;

    /// Discards a session.
    fn close(&self, session: u32) -> zbus::Result<()>;

    /// Shuts down the daemon.
    fn quit(&self) -> zbus::Result<()>;

    /// Published device name.
    #[zbus(property)]
    fn name(&self) -> zbus::Result<String>;

    /// Number of lines.
    #[zbus(property)]
    fn line_count(&self) -> zbus::Result<u32>;

    /// GPIO numbers in segment order.
    #[zbus(property)]
    fn lines(&self) -> zbus::Result<Vec<u32>>;

    /// GPIO backend name.
    #[zbus(property)]
    fn backend(&self) -> zbus::Result<String>;

    /// Number of open sessions.
    #[zbus(property)]
    fn open_sessions(&self) -> zbus::Result<u32>;
}

/// Status reported by the daemon.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub name: String,
    pub backend: String,
    pub lines: Vec<u32>,
    pub open_sessions: u32,
}

/// D-Bus client wrapper for the daemon.
pub struct DeviceClient {
    proxy: Device1Proxy<'static>,
}

impl DeviceClient {
    /// Attempts to connect to the daemon via D-Bus with auto bus detection.
    pub async fn connect() -> Result<Self> {
        Self::connect_with_bus(BusType::Auto).await
    }

    /// Attempts to connect to the daemon via D-Bus with specified bus type.
    pub async fn connect_with_bus(bus_type: BusType) -> Result<Self> {
        let connection = match bus_type {
            BusType::Session => {
                debug!("Connecting to session bus");
                Connection::session()
                    .await
                    .context("Failed to connect to session bus")?
            }
            BusType::System => {
                debug!("Connecting to system bus");
                Connection::system()
                    .await
                    .context("Failed to connect to system bus")?
            }
            BusType::Auto => {
                // Try session bus first, but verify the service exists
                let session = Connection::session().await.ok();
                let on_session = match &session {
                    Some(conn) => Self::service_exists(conn).await,
                    None => false,
                };
                match session {
                    Some(conn) if on_session => {
                        debug!("Found daemon on session bus");
                        conn
                    }
                    _ => {
                        debug!("Daemon not on session bus, trying system bus");
                        let sys_conn = Connection::system()
                            .await
                            .context("Failed to connect to system bus")?;
                        if !Self::service_exists(&sys_conn).await {
                            anyhow::bail!(
                                "Daemon service not found on session or system bus. Is sevensegd running?"
                            );
                        }
                        sys_conn
                    }
                }
            }
        };

        let proxy = Device1Proxy::new(&connection)
            .await
            .context("Failed to create D-Bus proxy")?;

        Ok(Self { proxy })
    }

    /// Checks if the daemon service exists on the given connection.
    async fn service_exists(conn: &Connection) -> bool {
        use zbus::fdo::DBusProxy;
        let Ok(name) = zbus::names::BusName::try_from(BUS_NAME) else {
            return false;
        };
        match DBusProxy::new(conn).await {
            Ok(dbus_proxy) => dbus_proxy.name_has_owner(name).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Opens a session.
    pub async fn open(&self) -> Result<u32> {
        self.proxy
            .open()
            .await
            .context("Failed to open device via D-Bus")
    }

    /// Reads from a session. Empty means end-of-data.
    pub async fn read(&self, session: u32, length: u32) -> Result<Vec<u8>> {
        self.proxy
            .read(session, length)
            .await
            .context("Failed to read device via D-Bus")
    }

    /// Writes to a session.
    pub async fn write(&self, session: u32, data: &[u8]) -> Result<u32> {
        self.proxy
            .write(session, data, data.len() as u32)
            .await
            .context("Failed to write device via D-Bus")
    }

    /// Closes a session.
    pub async fn close(&self, session: u32) -> Result<()> {
        self.proxy
            .close(session)
            .await
            .context("Failed to close device via D-Bus")
    }

    /// Closes a session, logging instead of failing.
    async fn close_quietly(&self, session: u32) {
        if let Err(e) = self.close(session).await {
            warn!("Failed to close session {}: {:#}", session, e);
        }
    }

    /// Reads the current record in a fresh session.
    pub async fn read_record(&self) -> Result<Vec<u8>> {
        let length = self.line_count().await? + 1;
        let session = self.open().await?;
        let result = self.read(session, length).await;
        self.close_quietly(session).await;
        result
    }

    /// Reads the current line states as a segment pattern.
    pub async fn pattern(&self) -> Result<SegmentPattern> {
        let record = self.read_record().await?;
        Ok(SegmentPattern::from_record(&record))
    }

    /// Writes a raw bit string in a fresh session.
    pub async fn write_bits(&self, bits: &str) -> Result<u32> {
        let session = self.open().await?;
        let result = self.write(session, bits.as_bytes()).await;
        self.close_quietly(session).await;
        result
    }

    /// Lights exactly the segments in `pattern`.
    pub async fn show(&self, pattern: SegmentPattern) -> Result<()> {
        self.write_bits(&pattern.to_bit_string()).await?;
        Ok(())
    }

    /// Flips one segment and returns the resulting pattern.
    ///
    /// Not atomic: the read and the write use separate sessions, so a write
    /// from another client in between is overwritten.
    pub async fn toggle(&self, segment: Segment) -> Result<SegmentPattern> {
        let mut pattern = self.pattern().await?;
        pattern.toggle(segment);
        self.show(pattern).await?;
        Ok(pattern)
    }

    /// Number of lines on the device.
    pub async fn line_count(&self) -> Result<u32> {
        self.proxy
            .line_count()
            .await
            .context("Failed to get line count via D-Bus")
    }

    /// Gets the daemon status.
    pub async fn status(&self) -> Result<DeviceStatus> {
        Ok(DeviceStatus {
            name: self.proxy.name().await.context("Failed to get device name")?,
            backend: self.proxy.backend().await.context("Failed to get backend")?,
            lines: self.proxy.lines().await.context("Failed to get lines")?,
            open_sessions: self
                .proxy
                .open_sessions()
                .await
                .context("Failed to get open sessions")?,
        })
    }

    /// Requests daemon shutdown.
    pub async fn quit(&self) -> Result<()> {
        self.proxy
            .quit()
            .await
            .context("Failed to quit daemon via D-Bus")
    }
}
