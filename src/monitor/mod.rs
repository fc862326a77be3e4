//! Per-bus monitor loop: capture, parse, aggregate, report.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::parse::parse_slice;
use crate::capture::CaptureSource;
use crate::export::health::HealthMetrics;
use crate::window::{aggregate, Throughput, WindowSample};

/// Reporter states. Degraded means the last capture failed; the loop keeps
/// ticking either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Sampling,
    Degraded,
}

/// Outcome of a single report tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickStatus {
    /// Capture succeeded and the window carried payload bytes.
    Traffic {
        sample: WindowSample,
        rate: Throughput,
    },
    /// Capture succeeded but the window carried no payload bytes.
    Idle,
    /// Capture failed; the cause stays visible to the operator so an idle
    /// bus is never confused with an unobservable one.
    Unavailable { cause: String },
}

impl fmt::Display for TickStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Traffic { rate, .. } => write!(
                f,
                "USB traffic: {:.2} KB/s ({:.0} bytes/s)",
                rate.kb_per_sec, rate.bytes_per_sec,
            ),
            Self::Idle => f.write_str("No USB activity detected"),
            Self::Unavailable { cause } => write!(f, "USB capture unavailable: {cause}"),
        }
    }
}

/// One emitted report line: `HH:MM:SS - <message>`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub time: chrono::NaiveTime,
    pub status: TickStatus,
}

impl StatusLine {
    fn now(status: TickStatus) -> Self {
        Self {
            time: Local::now().time(),
            status,
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.time.format("%H:%M:%S"), self.status)
    }
}

/// Destination for report lines.
pub trait StatusSink: Send {
    fn emit(&mut self, line: &StatusLine);
}

/// Writes report lines to standard output, one per tick.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StatusSink for StdoutSink {
    fn emit(&mut self, line: &StatusLine) {
        println!("{line}");
    }
}

/// Long-lived reporting loop for one bus.
///
/// Owns its capture source and temporary buffers exclusively; several
/// monitors may run concurrently against different buses without sharing
/// mutable state.
pub struct BusMonitor<C, S> {
    source: C,
    sink: S,
    window: Duration,
    period: Duration,
    state: MonitorState,
    bus_label: String,
    health: Arc<HealthMetrics>,
}

impl<C: CaptureSource, S: StatusSink> BusMonitor<C, S> {
    pub fn new(
        source: C,
        sink: S,
        window: Duration,
        period: Duration,
        health: Arc<HealthMetrics>,
    ) -> Self {
        let bus_label = source.bus().to_string();

        Self {
            source,
            sink,
            window,
            period,
            state: MonitorState::Sampling,
            bus_label,
            health,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Runs until cancelled. Every tick emits exactly one status line; a
    /// failed capture degrades the tick, never the loop.
    pub async fn run(mut self, cancel: CancellationToken) {
        let bus = self.source.bus();
        info!(bus, window = ?self.window, period = ?self.period, "bus monitor started");

        // Default burst behavior: when a tick overruns the period, the next
        // one starts immediately instead of sleeping a negative duration.
        let mut ticker = tokio::time::interval(self.period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(bus, "bus monitor stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let line = self.tick().await;
                    self.sink.emit(&line);
                }
            }
        }
    }

    /// Executes one capture-parse-aggregate-report cycle.
    pub async fn tick(&mut self) -> StatusLine {
        let bus = self.source.bus();
        let window_start = SystemTime::now();

        self.health
            .ticks_total
            .with_label_values(&[&self.bus_label])
            .inc();

        let status = match self.source.capture(self.window).await {
            Ok(slice) => {
                if self.state == MonitorState::Degraded {
                    info!(bus, "capture recovered");
                    self.state = MonitorState::Sampling;
                    self.health
                        .bus_degraded
                        .with_label_values(&[&self.bus_label])
                        .set(0.0);
                }

                let sample = aggregate(parse_slice(&slice), window_start);
                let rate = Throughput::of(&sample, self.window);

                self.health
                    .packets_observed_total
                    .with_label_values(&[&self.bus_label])
                    .inc_by(sample.packet_count as f64);
                self.health
                    .bytes_observed_total
                    .with_label_values(&[&self.bus_label])
                    .inc_by(sample.total_bytes as f64);
                self.health
                    .throughput_bytes
                    .with_label_values(&[&self.bus_label])
                    .set(rate.bytes_per_sec);

                debug!(
                    bus,
                    bytes = sample.total_bytes,
                    packets = sample.packet_count,
                    "window aggregated",
                );

                if sample.is_idle() {
                    TickStatus::Idle
                } else {
                    TickStatus::Traffic { sample, rate }
                }
            }
            Err(e) => {
                self.health
                    .capture_errors_total
                    .with_label_values(&[&self.bus_label, e.kind_label()])
                    .inc();
                self.health
                    .throughput_bytes
                    .with_label_values(&[&self.bus_label])
                    .set(0.0);

                if self.state == MonitorState::Sampling {
                    warn!(bus, error = %e, "capture failed, reporting degraded");
                    self.state = MonitorState::Degraded;
                    self.health
                        .bus_degraded
                        .with_label_values(&[&self.bus_label])
                        .set(1.0);
                } else {
                    debug!(bus, error = %e, "capture still failing");
                }

                TickStatus::Unavailable {
                    cause: e.to_string(),
                }
            }
        };

        StatusLine::now(status)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;

    use super::*;
    use crate::capture::{CaptureError, CaptureSlice};

    /// Capture source that replays a script of outcomes, then idles.
    struct ScriptedSource {
        bus: u8,
        script: VecDeque<Result<String, CaptureError>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<String, CaptureError>>) -> Self {
            Self {
                bus: 1,
                script: script.into(),
            }
        }
    }

    impl CaptureSource for ScriptedSource {
        fn bus(&self) -> u8 {
            self.bus
        }

        async fn capture(&mut self, _duration: Duration) -> Result<CaptureSlice, CaptureError> {
            match self.script.pop_front() {
                Some(Ok(text)) => Ok(CaptureSlice {
                    bus: self.bus,
                    text,
                }),
                Some(Err(e)) => Err(e),
                None => Ok(CaptureSlice {
                    bus: self.bus,
                    text: String::new(),
                }),
            }
        }
    }

    fn monitor(script: Vec<Result<String, CaptureError>>) -> BusMonitor<ScriptedSource, StdoutSink> {
        let health = Arc::new(HealthMetrics::new(":0").expect("metrics"));
        BusMonitor::new(
            ScriptedSource::new(script),
            StdoutSink,
            Duration::from_secs(1),
            Duration::from_secs(1),
            health,
        )
    }

    fn permission_denied() -> CaptureError {
        CaptureError::PermissionDenied {
            path: PathBuf::from("/sys/kernel/debug/usb/usbmon/1u"),
        }
    }

    #[tokio::test]
    async fn test_traffic_tick_formats_rate() {
        let mut m = monitor(vec![Ok("tag 1024".to_string())]);

        let line = m.tick().await;
        assert_eq!(
            line.status.to_string(),
            "USB traffic: 1.00 KB/s (1024 bytes/s)"
        );
        assert_eq!(m.state(), MonitorState::Sampling);
    }

    #[tokio::test]
    async fn test_idle_tick_is_not_a_failure() {
        let mut m = monitor(vec![Ok(String::new())]);

        let line = m.tick().await;
        assert_eq!(line.status, TickStatus::Idle);
        assert_eq!(line.status.to_string(), "No USB activity detected");
        assert_eq!(m.state(), MonitorState::Sampling);
    }

    #[tokio::test]
    async fn test_capture_error_degrades_then_recovers() {
        let mut m = monitor(vec![
            Err(permission_denied()),
            Ok("tag 2048".to_string()),
        ]);

        let first = m.tick().await;
        assert!(matches!(first.status, TickStatus::Unavailable { .. }));
        assert!(first
            .status
            .to_string()
            .starts_with("USB capture unavailable: permission denied"));
        assert_eq!(m.state(), MonitorState::Degraded);

        // The very next tick attempts capture again and recovers.
        let second = m.tick().await;
        assert_eq!(
            second.status.to_string(),
            "USB traffic: 2.00 KB/s (2048 bytes/s)"
        );
        assert_eq!(m.state(), MonitorState::Sampling);
    }

    #[tokio::test]
    async fn test_repeated_failures_stay_degraded() {
        let mut m = monitor(vec![Err(permission_denied()), Err(permission_denied())]);

        m.tick().await;
        let second = m.tick().await;
        assert!(matches!(second.status, TickStatus::Unavailable { .. }));
        assert_eq!(m.state(), MonitorState::Degraded);
    }

    #[tokio::test]
    async fn test_zero_length_packets_report_idle() {
        // Lines with no qualifying field still count as packets but carry
        // no bytes; the tick reads as idle.
        let mut m = monitor(vec![Ok("deadbeef C Ii:1:001:1\ncafebabe S".to_string())]);

        let line = m.tick().await;
        assert_eq!(line.status, TickStatus::Idle);
    }

    #[tokio::test]
    async fn test_run_emits_one_line_per_tick_and_stops_on_cancel() {
        let health = Arc::new(HealthMetrics::new(":0").expect("metrics"));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        struct ChannelSink(tokio::sync::mpsc::UnboundedSender<StatusLine>);
        impl StatusSink for ChannelSink {
            fn emit(&mut self, line: &StatusLine) {
                let _ = self.0.send(line.clone());
            }
        }

        let m = BusMonitor::new(
            ScriptedSource::new(vec![Ok("tag 512".to_string())]),
            ChannelSink(tx),
            Duration::from_millis(5),
            Duration::from_millis(5),
            health,
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(m.run(cancel.clone()));

        // 512 bytes over a 5ms window scales to 102400 bytes/s.
        let first = rx.recv().await.expect("first line");
        assert_eq!(
            first.status.to_string(),
            "USB traffic: 100.00 KB/s (102400 bytes/s)"
        );

        let second = rx.recv().await.expect("second line");
        assert_eq!(second.status, TickStatus::Idle);

        cancel.cancel();
        handle.await.expect("join");
    }

    #[test]
    fn test_status_line_display_format() {
        let line = StatusLine {
            time: chrono::NaiveTime::from_hms_opt(14, 3, 9).expect("valid time"),
            status: TickStatus::Idle,
        };
        assert_eq!(line.to_string(), "14:03:09 - No USB activity detected");
    }
}
