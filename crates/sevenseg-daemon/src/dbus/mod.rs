//! D-Bus publication of the display device.
//!
//! Provides the `org.sevenseg.Device1` interface at `/org/sevenseg/Device`.

mod interface;

pub use interface::DbusPublisher;

/// Well-known bus name of the daemon.
pub const BUS_NAME: &str = "org.sevenseg.Device";

/// Object path of the published device.
pub const OBJECT_PATH: &str = "/org/sevenseg/Device";
