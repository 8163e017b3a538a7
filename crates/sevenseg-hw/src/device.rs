//! Byte-stream device protocol over the pin registry.
//!
//! Writing `"1010110"` lights the lines whose character is `'1'`. Reading
//! returns one record: one `'0'`/`'1'` per line plus a NUL terminator. Each
//! session gets that record once, then end-of-data.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::line::LineProvider;
use crate::registry::PinRegistry;
use crate::{Error, Result};

/// Memory owned by the caller that the device copies bytes out of.
pub trait UserSource {
    /// Fills `dst` completely from the caller's memory.
    fn copy_out(&self, dst: &mut [u8]) -> Result<()>;
}

/// Memory owned by the caller that the device copies bytes into.
pub trait UserSink {
    /// Delivers all of `src` to the caller's memory.
    fn copy_in(&mut self, src: &[u8]) -> Result<()>;
}

impl UserSource for [u8] {
    fn copy_out(&self, dst: &mut [u8]) -> Result<()> {
        let src = self.get(..dst.len()).ok_or(Error::BoundaryTransfer)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

impl UserSource for Vec<u8> {
    fn copy_out(&self, dst: &mut [u8]) -> Result<()> {
        self.as_slice().copy_out(dst)
    }
}

impl UserSource for str {
    fn copy_out(&self, dst: &mut [u8]) -> Result<()> {
        self.as_bytes().copy_out(dst)
    }
}

impl UserSink for [u8] {
    fn copy_in(&mut self, src: &[u8]) -> Result<()> {
        let dst = self.get_mut(..src.len()).ok_or(Error::BoundaryTransfer)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

impl UserSink for Vec<u8> {
    fn copy_in(&mut self, src: &[u8]) -> Result<()> {
        self.extend_from_slice(src);
        Ok(())
    }
}

/// Parses a NUL-terminated bit string into at most `lines` levels.
///
/// Any byte other than `'1'` means off, including bytes that are not `'0'`.
pub fn parse_levels(buf: &[u8], lines: usize) -> Vec<bool> {
    buf.iter()
        .take(lines)
        .take_while(|&&b| b != 0)
        .map(|&b| b == b'1')
        .collect()
}

/// Encodes line levels as a NUL-terminated record.
pub fn encode_levels(levels: &[bool]) -> Vec<u8> {
    let mut record: Vec<u8> = levels.iter().map(|&on| if on { b'1' } else { b'0' }).collect();
    record.push(0);
    record
}

/// The published display device.
pub struct SegmentDevice<P: LineProvider> {
    registry: Arc<PinRegistry<P>>,
}

impl<P: LineProvider> Clone for SegmentDevice<P> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<P: LineProvider> SegmentDevice<P> {
    /// Creates a device over an acquired registry.
    pub fn new(registry: Arc<PinRegistry<P>>) -> Self {
        Self { registry }
    }

    /// Opens a new session with its read cursor at zero.
    pub fn open(&self) -> Session<P> {
        debug!("Device opened");
        Session {
            registry: Arc::clone(&self.registry),
            cursor: 0,
        }
    }

    /// Size of one read record: a character per line plus the terminator.
    pub fn record_len(&self) -> usize {
        self.registry.len() + 1
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<PinRegistry<P>> {
        &self.registry
    }
}

/// State of one open of the device.
pub struct Session<P: LineProvider> {
    registry: Arc<PinRegistry<P>>,
    cursor: usize,
}

impl<P: LineProvider> Session<P> {
    /// Bytes already delivered by [`read`](Self::read).
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Copies the current line states into `dst`.
    ///
    /// Returns the record length on the first successful call and `0` on every
    /// call after. A destination shorter than the record is a transfer fault
    /// and leaves the cursor where it was.
    pub fn read<D: UserSink + ?Sized>(&mut self, dst: &mut D, length: usize) -> Result<usize> {
        if self.cursor > 0 {
            return Ok(0);
        }

        let record = encode_levels(&self.registry.snapshot());
        if length < record.len() {
            warn!(
                "Read buffer too small: {} bytes for a {} byte record",
                length,
                record.len()
            );
            return Err(Error::BoundaryTransfer);
        }
        if let Err(e) = dst.copy_in(&record) {
            warn!("Failed to send line states to caller");
            return Err(e);
        }

        self.cursor += record.len();
        debug!("Sent {} line states to caller", record.len() - 1);
        Ok(record.len())
    }

    /// Sets lines from the bit string in `src`.
    ///
    /// At most one byte per line is copied. The copy completes before any line
    /// changes, so a transfer fault leaves every line untouched. Positions past
    /// the end of the string keep their state. Returns `length`.
    pub fn write<S: UserSource + ?Sized>(&self, src: &S, length: usize) -> Result<usize> {
        if length == 0 {
            return Ok(0);
        }

        let lines = self.registry.len();
        // The extra slot always holds the terminator.
        let mut buf = vec![0u8; lines + 1];
        let count = length.min(lines);
        if let Err(e) = src.copy_out(&mut buf[..count]) {
            warn!("Failed to receive data from caller");
            return Err(e);
        }

        let levels = parse_levels(&buf, lines);
        self.registry.apply(&levels)?;
        debug!("Received {} bytes from caller", length);
        Ok(length)
    }

    /// Ends the session. Line states are unaffected.
    pub fn close(self) {
        debug!("Device closed");
    }
}
