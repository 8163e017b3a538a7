//! GPIO line backends.
//!
//! A [`LineProvider`] performs the raw per-line steps. The registry decides
//! their order and handles rollback.

mod sim;
mod sysfs;

pub use sim::{LineEvent, SimulatedProvider};
pub use sysfs::SysfsProvider;

use crate::Result;

/// Hardware identifier of a line (the kernel GPIO number).
pub type LineId = u32;

/// Raw operations on individual GPIO lines.
///
/// Claiming and freeing are paired, as are exposing and unexposing.
pub trait LineProvider: Send {
    /// Short backend name, used in logs and status output.
    fn name(&self) -> &str;

    /// Claims exclusive use of a line.
    fn claim(&mut self, id: LineId, label: &str) -> Result<()>;

    /// Configures a claimed line as an output driving `level`.
    fn set_output(&mut self, id: LineId, level: bool) -> Result<()>;

    /// Makes a configured line visible and controllable from outside.
    fn expose(&mut self, id: LineId) -> Result<()>;

    /// Drives an output line.
    fn set_level(&mut self, id: LineId, level: bool) -> Result<()>;

    /// Reads the live level of a line.
    fn level(&mut self, id: LineId) -> Result<bool>;

    /// Reverses [`expose`](Self::expose).
    fn unexpose(&mut self, id: LineId) -> Result<()>;

    /// Returns a claimed line to the system.
    fn free(&mut self, id: LineId) -> Result<()>;
}

impl<P: LineProvider + ?Sized> LineProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn claim(&mut self, id: LineId, label: &str) -> Result<()> {
        (**self).claim(id, label)
    }

    fn set_output(&mut self, id: LineId, level: bool) -> Result<()> {
        (**self).set_output(id, level)
    }

    fn expose(&mut self, id: LineId) -> Result<()> {
        (**self).expose(id)
    }

    fn set_level(&mut self, id: LineId, level: bool) -> Result<()> {
        (**self).set_level(id, level)
    }

    fn level(&mut self, id: LineId) -> Result<bool> {
        (**self).level(id)
    }

    fn unexpose(&mut self, id: LineId) -> Result<()> {
        (**self).unexpose(id)
    }

    fn free(&mut self, id: LineId) -> Result<()> {
        (**self).free(id)
    }
}
