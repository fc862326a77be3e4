//! Window aggregation of parsed packet records.

use std::time::{Duration, SystemTime};

use crate::capture::parse::PacketRecord;

/// Aggregate of one reporting window.
///
/// Immutable once produced. Totals are exact integers; rate conversion
/// happens only at display time. A zero window is a valid idle sample,
/// distinct from a failed capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSample {
    pub window_start: SystemTime,
    pub total_bytes: u64,
    pub packet_count: u64,
}

impl WindowSample {
    /// True when the window carried no payload bytes.
    pub fn is_idle(&self) -> bool {
        self.total_bytes == 0
    }
}

/// Sums records into a sample.
///
/// Purely functional: no state survives between windows, leftover bytes
/// never spill into the next one.
pub fn aggregate(
    records: impl IntoIterator<Item = PacketRecord>,
    window_start: SystemTime,
) -> WindowSample {
    let mut total_bytes: u64 = 0;
    let mut packet_count: u64 = 0;

    for record in records {
        total_bytes = total_bytes.saturating_add(record.byte_length);
        packet_count += 1;
    }

    WindowSample {
        window_start,
        total_bytes,
        packet_count,
    }
}

/// Display-oriented rate view of a window sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub bytes_per_sec: f64,
    pub kb_per_sec: f64,
}

impl Throughput {
    /// Rate of a sample over the window that produced it. A zero-length
    /// window falls back to the raw totals rather than dividing by zero.
    pub fn of(sample: &WindowSample, window: Duration) -> Self {
        let secs = window.as_secs_f64();
        let bytes_per_sec = if secs > 0.0 {
            sample.total_bytes as f64 / secs
        } else {
            sample.total_bytes as f64
        };

        Self {
            bytes_per_sec,
            kb_per_sec: bytes_per_sec / 1024.0,
        }
    }
}
