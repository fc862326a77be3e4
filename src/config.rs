use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::capture::DEFAULT_DEBUGFS_PATH;

/// Top-level configuration for the usboor agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// Bus monitors to run. Default: a single monitor on bus 1.
    #[serde(default = "default_monitors")]
    pub monitors: Vec<MonitorConfig>,

    /// Capture interface configuration.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Configuration for one bus monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// USB bus number to watch. Default: 1.
    #[serde(default = "default_bus")]
    pub bus: u8,

    /// Capture window per tick. Default: 1s.
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,

    /// Reporting cadence, typically equal to the window. Default: 1s.
    #[serde(default = "default_report_period", with = "humantime_serde")]
    pub report_period: Duration,
}

/// Capture interface configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Root of the usbmon debugfs tree.
    #[serde(default = "default_debugfs_path")]
    pub debugfs_path: PathBuf,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bus() -> u8 {
    1
}

fn default_window() -> Duration {
    Duration::from_secs(1)
}

fn default_report_period() -> Duration {
    Duration::from_secs(1)
}

fn default_monitors() -> Vec<MonitorConfig> {
    vec![MonitorConfig::default()]
}

fn default_debugfs_path() -> PathBuf {
    PathBuf::from(DEFAULT_DEBUGFS_PATH)
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            monitors: default_monitors(),
            capture: CaptureConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bus: default_bus(),
            window: default_window(),
            report_period: default_report_period(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            debugfs_path: default_debugfs_path(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.monitors.is_empty() {
            bail!("at least one monitor is required");
        }

        let mut seen = HashSet::new();
        for monitor in &self.monitors {
            if monitor.window.is_zero() {
                bail!("monitor for bus {}: window must be positive", monitor.bus);
            }

            if monitor.report_period.is_zero() {
                bail!(
                    "monitor for bus {}: report_period must be positive",
                    monitor.bus
                );
            }

            if !seen.insert(monitor.bus) {
                bail!("bus {} is configured more than once", monitor.bus);
            }
        }

        if self.capture.debugfs_path.as_os_str().is_empty() {
            bail!("capture.debugfs_path must not be empty");
        }

        Ok(())
    }
}
