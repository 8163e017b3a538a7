//! Error types for the seven-segment hardware library.

use thiserror::Error;

use crate::line::LineId;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when driving the display lines.
#[derive(Error, Debug)]
pub enum Error {
    /// The line is already claimed by another consumer.
    #[error("GPIO line {id} is busy")]
    LineBusy { id: LineId },

    /// The line does not exist or could not be configured.
    #[error("GPIO line {id} is unavailable: {reason}")]
    LineUnavailable { id: LineId, reason: String },

    /// The device could not be published.
    #[error("Device registration failed: {0}")]
    Registration(String),

    /// Copying bytes to or from the caller's buffer failed.
    #[error("Bad address: transfer across the caller boundary failed")]
    BoundaryTransfer,

    /// Position outside the registry. Indicates a caller bug.
    #[error("Line position {position} out of range (registry has {len} lines)")]
    InvalidPosition { position: usize, len: usize },

    /// Line configuration rejected before touching hardware.
    #[error("Invalid line configuration: {0}")]
    InvalidConfig(String),

    /// Segment pattern could not be parsed.
    #[error("Invalid segment pattern: {0}")]
    InvalidPattern(String),

    /// Backend I/O error while driving a line.
    #[error("GPIO I/O error: {0}")]
    Io(#[from] std::io::Error),
}
