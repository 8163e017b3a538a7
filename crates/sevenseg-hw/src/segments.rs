//! Seven-segment glyphs.
//!
//! Segment positions follow the usual labelling, `A` at the top going
//! clockwise to `F`, with `G` in the middle. Position `i` is character `i` of
//! the device bit string.

use std::str::FromStr;

use crate::device::parse_levels;
use crate::{Error, Result, LINE_COUNT};

/// One segment of the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

impl Segment {
    /// All segments in position order.
    pub const ALL: [Segment; LINE_COUNT] = [
        Segment::A,
        Segment::B,
        Segment::C,
        Segment::D,
        Segment::E,
        Segment::F,
        Segment::G,
    ];

    /// Position of this segment in the device bit string.
    pub fn position(&self) -> usize {
        *self as usize
    }

    fn bit(&self) -> u8 {
        1 << self.position()
    }
}

impl FromStr for Segment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "a" => Ok(Segment::A),
            "b" => Ok(Segment::B),
            "c" => Ok(Segment::C),
            "d" => Ok(Segment::D),
            "e" => Ok(Segment::E),
            "f" => Ok(Segment::F),
            "g" => Ok(Segment::G),
            _ => Err(Error::InvalidPattern(format!("unknown segment '{}'", s))),
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = (b'a' + self.position() as u8) as char;
        write!(f, "{}", letter)
    }
}

/// The set of lit segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentPattern(u8);

/// Hex glyphs, bit `i` lighting the segment at position `i`.
const HEX_GLYPHS: [u8; 16] = [
    0b011_1111, // 0
    0b000_0110, // 1
    0b101_1011, // 2
    0b100_1111, // 3
    0b110_0110, // 4
    0b110_1101, // 5
    0b111_1101, // 6
    0b000_0111, // 7
    0b111_1111, // 8
    0b110_1111, // 9
    0b111_0111, // A
    0b111_1100, // b
    0b011_1001, // C
    0b101_1110, // d
    0b111_1001, // E
    0b111_0001, // F
];

const ALL_BITS: u8 = 0b111_1111;

impl SegmentPattern {
    /// No segment lit.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Every segment lit.
    pub fn all() -> Self {
        Self(ALL_BITS)
    }

    /// Glyph for a hex digit or `'-'`. Returns `None` for anything else.
    pub fn digit(c: char) -> Option<Self> {
        if c == '-' {
            return Some(Self(Segment::G.bit()));
        }
        c.to_digit(16).map(|d| Self(HEX_GLYPHS[d as usize]))
    }

    /// Builds a pattern from line levels. Levels past segment G are ignored.
    pub fn from_levels(levels: &[bool]) -> Self {
        levels
            .iter()
            .zip(Segment::ALL)
            .filter(|(&on, _)| on)
            .fold(Self::empty(), |p, (_, seg)| p.with(seg))
    }

    /// Parses a record read from the device.
    pub fn from_record(record: &[u8]) -> Self {
        Self::from_levels(&parse_levels(record, LINE_COUNT))
    }

    /// Returns a copy with `segment` lit.
    pub fn with(mut self, segment: Segment) -> Self {
        self.set(segment, true);
        self
    }

    /// Lights or clears one segment.
    pub fn set(&mut self, segment: Segment, on: bool) {
        if on {
            self.0 |= segment.bit();
        } else {
            self.0 &= !segment.bit();
        }
    }

    /// Flips one segment.
    pub fn toggle(&mut self, segment: Segment) {
        self.0 ^= segment.bit();
    }

    /// Returns true if `segment` is lit.
    pub fn contains(&self, segment: Segment) -> bool {
        self.0 & segment.bit() != 0
    }

    /// Lit segments in position order.
    pub fn segments(&self) -> Vec<Segment> {
        Segment::ALL
            .into_iter()
            .filter(|s| self.contains(*s))
            .collect()
    }

    /// Raw bits, bit `i` for position `i`.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Encodes the pattern in the device write format, e.g. `"1010110"`.
    pub fn to_bit_string(&self) -> String {
        Segment::ALL
            .iter()
            .map(|s| if self.contains(*s) { '1' } else { '0' })
            .collect()
    }
}

impl FromStr for SegmentPattern {
    type Err = Error;

    /// Accepts a bit string (`"1100000"`) or a segment list (`"a,b,g"`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidPattern("empty pattern".to_string()));
        }

        if s.chars().all(|c| c == '0' || c == '1') {
            if s.len() > LINE_COUNT {
                return Err(Error::InvalidPattern(format!(
                    "bit string longer than {} segments",
                    LINE_COUNT
                )));
            }
            let levels: Vec<bool> = s.chars().map(|c| c == '1').collect();
            return Ok(Self::from_levels(&levels));
        }

        let segments = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(Segment::from_str)
            .collect::<Result<Vec<_>>>()?;
        Ok(segments.into_iter().fold(Self::empty(), Self::with))
    }
}

impl std::fmt::Display for SegmentPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_bit_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digit_glyphs() {
        assert_eq!(SegmentPattern::digit('0').unwrap().to_bit_string(), "1111110");
        assert_eq!(SegmentPattern::digit('1').unwrap().to_bit_string(), "0110000");
        assert_eq!(SegmentPattern::digit('8').unwrap(), SegmentPattern::all());
        assert_eq!(SegmentPattern::digit('-').unwrap().to_bit_string(), "0000001");
        assert_eq!(
            SegmentPattern::digit('A').unwrap(),
            SegmentPattern::digit('a').unwrap()
        );
        assert!(SegmentPattern::digit('z').is_none());
    }

    #[test]
    fn test_toggle() {
        let mut pattern = SegmentPattern::digit('7').unwrap();
        pattern.toggle(Segment::A);
        assert_eq!(pattern.segments(), vec![Segment::B, Segment::C]);
        pattern.toggle(Segment::A);
        assert_eq!(pattern, SegmentPattern::digit('7').unwrap());
    }

    #[test]
    fn test_parse_bit_string() {
        let pattern: SegmentPattern = "1010110".parse().unwrap();
        assert_eq!(
            pattern.segments(),
            vec![Segment::A, Segment::C, Segment::E, Segment::F]
        );
        let short: SegmentPattern = "11".parse().unwrap();
        assert_eq!(short.to_bit_string(), "1100000");
        assert!("11111111".parse::<SegmentPattern>().is_err());
    }

    #[test]
    fn test_parse_segment_list() {
        let pattern: SegmentPattern = "a, B g".parse().unwrap();
        assert_eq!(pattern.segments(), vec![Segment::A, Segment::B, Segment::G]);
        assert!("a,h".parse::<SegmentPattern>().is_err());
        assert!("".parse::<SegmentPattern>().is_err());
    }

    #[test]
    fn test_from_record() {
        let pattern = SegmentPattern::from_record(b"0110000\0");
        assert_eq!(pattern, SegmentPattern::digit('1').unwrap());
    }

    #[test]
    fn test_segment_display() {
        assert_eq!(Segment::A.to_string(), "a");
        assert_eq!(Segment::G.to_string(), "g");
        assert_eq!(Segment::D.position(), 3);
    }
}
