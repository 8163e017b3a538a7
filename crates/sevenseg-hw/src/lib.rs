//! Seven-segment display hardware library.
//!
//! Exposes a fixed set of GPIO output lines as a single byte-stream device:
//! writing an ASCII bit pattern sets the lines, reading returns their levels.

pub mod device;
pub mod error;
pub mod line;
pub mod registry;
pub mod segments;

pub use device::{SegmentDevice, Session, UserSink, UserSource};
pub use error::{Error, Result};
pub use line::{LineEvent, LineId, LineProvider, SimulatedProvider, SysfsProvider};
pub use registry::{Line, PinRegistry};
pub use segments::{Segment, SegmentPattern};

/// Name the device is published under.
pub const DEVICE_NAME: &str = "sevenseg";

/// Number of lines on the reference display (segments A through G).
pub const LINE_COUNT: usize = 7;

/// GPIO numbers for segments A through G on the reference board.
pub const DEFAULT_LINES: [LineId; LINE_COUNT] = [17, 18, 27, 22, 23, 24, 25];
