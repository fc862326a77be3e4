//! usbmon-based USB bus traffic monitoring agent.
//!
//! Samples the kernel usbmon debugfs text interface one bounded window at a
//! time, extracts payload byte lengths from the captured records, and reports
//! a throughput estimate per window on a fixed cadence.

pub mod agent;
pub mod capture;
pub mod config;
pub mod export;
pub mod monitor;
pub mod window;
