//! Agent orchestrates the health server and the per-bus monitor tasks.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::UsbmonSource;
use crate::config::Config;
use crate::export::health::HealthMetrics;
use crate::monitor::{BusMonitor, StdoutSink};

/// Agent owns the root cancellation token, the shared health registry, and
/// one monitor task per configured bus.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    monitors: Vec<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            monitors: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Starts the health server and spawns one monitor task per bus.
    pub async fn start(&mut self) -> Result<()> {
        self.health
            .start()
            .await
            .context("starting health metrics server")?;

        for monitor_cfg in &self.cfg.monitors {
            // Each monitor owns its capture source exclusively; the child
            // token lets shutdown interrupt an in-flight capture.
            let source = UsbmonSource::new(
                monitor_cfg.bus,
                self.cfg.capture.debugfs_path.clone(),
                self.cancel.child_token(),
            );

            let monitor = BusMonitor::new(
                source,
                StdoutSink,
                monitor_cfg.window,
                monitor_cfg.report_period,
                Arc::clone(&self.health),
            );

            self.monitors
                .push(tokio::spawn(monitor.run(self.cancel.child_token())));

            info!(
                bus = monitor_cfg.bus,
                window = ?monitor_cfg.window,
                period = ?monitor_cfg.report_period,
                "monitor spawned",
            );
        }

        self.health.monitors_running.set(self.monitors.len() as f64);
        info!(monitors = self.monitors.len(), "agent fully started");

        Ok(())
    }

    /// Cancels and joins all monitor tasks, then stops the health server.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        for handle in self.monitors.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "monitor task join failed");
            }
        }

        self.health.monitors_running.set(0.0);
        self.health.stop().await?;

        Ok(())
    }
}
