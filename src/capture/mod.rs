//! Time-bounded acquisition of usbmon capture slices.
//!
//! The kernel exposes one text capture node per bus under debugfs. A capture
//! is a bounded read of that node: open non-blocking, poll until the deadline,
//! return whatever arrived. Hitting the deadline with nothing captured is a
//! normal outcome, not an error.

pub mod parse;

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Default debugfs root exposing per-bus usbmon text nodes.
pub const DEFAULT_DEBUGFS_PATH: &str = "/sys/kernel/debug/usb/usbmon";

/// Re-poll interval while the node has no data to give.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Raw text captured from one bus during one bounded sampling interval.
///
/// Owned by the tick that requested it and discarded after parsing.
#[derive(Debug, Clone)]
pub struct CaptureSlice {
    pub bus: u8,
    pub text: String,
}

/// Errors raised while acquiring a capture slice.
///
/// Every variant is recoverable: the monitor loop reports a degraded tick
/// and attempts capture again on the next one.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("permission denied reading {} (usbmon requires root)", path.display())]
    PermissionDenied { path: PathBuf },

    #[error(
        "usbmon interface unavailable at {} (is debugfs mounted and the usbmon module loaded?)",
        path.display()
    )]
    InterfaceUnavailable { path: PathBuf },

    #[error("bus {bus} has no capture node at {}", path.display())]
    DeviceNotFound { bus: u8, path: PathBuf },

    #[error("reading capture stream: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl CaptureError {
    /// Stable label for the capture error metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "permission_denied",
            Self::InterfaceUnavailable { .. } => "interface_unavailable",
            Self::DeviceNotFound { .. } => "device_not_found",
            Self::Io { .. } => "io",
        }
    }
}

/// A source of bounded capture slices for a single bus.
///
/// Implementations own their capture handle exclusively and keep no state
/// across calls; concurrent monitors never share a source.
pub trait CaptureSource: Send {
    /// Bus identifier this source captures.
    fn bus(&self) -> u8;

    /// Reads bus activity for up to `duration` and returns whatever was
    /// captured, possibly nothing. The read is time-bounded, not
    /// count-bounded; reaching the deadline is success.
    fn capture(
        &mut self,
        duration: Duration,
    ) -> impl std::future::Future<Output = Result<CaptureSlice, CaptureError>> + Send;
}

/// Capture source backed by the kernel usbmon text interface.
pub struct UsbmonSource {
    bus: u8,
    root: PathBuf,
    cancel: CancellationToken,
}

impl UsbmonSource {
    /// Creates a source for `bus` under the given debugfs root. The token
    /// interrupts an in-flight capture promptly on shutdown.
    pub fn new(bus: u8, root: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            bus,
            root: root.into(),
            cancel,
        }
    }

    fn node_path(&self) -> PathBuf {
        self.root.join(format!("{}u", self.bus))
    }
}

impl CaptureSource for UsbmonSource {
    fn bus(&self) -> u8 {
        self.bus
    }

    async fn capture(&mut self, duration: Duration) -> Result<CaptureSlice, CaptureError> {
        let bus = self.bus;
        let root = self.root.clone();
        let node = self.node_path();
        let cancel = self.cancel.clone();

        // The poll loop sleeps between empty reads, so it runs on the
        // blocking pool to keep monitor tasks responsive.
        let handle =
            tokio::task::spawn_blocking(move || read_bounded(bus, &root, &node, duration, &cancel));

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(CaptureError::Io {
                source: io::Error::new(io::ErrorKind::Other, e),
            }),
        }
    }
}

/// Opens the bus node and reads until the deadline, EOF, or cancellation.
///
/// The file handle is dropped on return; nothing is held open between
/// captures.
fn read_bounded(
    bus: u8,
    root: &Path,
    node: &Path,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<CaptureSlice, CaptureError> {
    let mut file = open_node(bus, root, node)?;

    let deadline = Instant::now() + duration;
    let mut raw = Vec::with_capacity(16 * 1024);
    let mut chunk = [0u8; 8192];

    while !cancel.is_cancelled() {
        match file.read(&mut chunk) {
            // EOF: the node has nothing more to give. The live usbmon node
            // never reaches this; regular-file fixtures hit it immediately.
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL.min(remaining));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(CaptureError::PermissionDenied {
                    path: node.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        if Instant::now() >= deadline {
            break;
        }
    }

    Ok(CaptureSlice {
        bus,
        text: String::from_utf8_lossy(&raw).into_owned(),
    })
}

/// Opens the usbmon node non-blocking, mapping the failure to the capture
/// error taxonomy: a missing root means the interface itself is gone, a
/// missing node under a present root means the bus has no capture node.
fn open_node(bus: u8, root: &Path, node: &Path) -> Result<std::fs::File, CaptureError> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut opts = std::fs::OpenOptions::new();
    opts.read(true).custom_flags(libc::O_NONBLOCK);

    match opts.open(node) {
        Ok(file) => Ok(file),
        Err(e) => match e.kind() {
            io::ErrorKind::PermissionDenied => Err(CaptureError::PermissionDenied {
                path: node.to_path_buf(),
            }),
            io::ErrorKind::NotFound if !root.exists() => Err(CaptureError::InterfaceUnavailable {
                path: root.to_path_buf(),
            }),
            io::ErrorKind::NotFound => Err(CaptureError::DeviceNotFound {
                bus,
                path: node.to_path_buf(),
            }),
            _ => Err(e.into()),
        },
    }
}
