//! Capture device abstraction
//!
//! A [`CaptureBackend`] opens a [`CaptureDevice`] for a [`SourceLocator`]. Devices are
//! driven by exactly one capture thread; the only cross-thread operation is the
//! [`ReleaseHandle`], which `FrameSource::stop()` uses to tear down a device whose
//! thread did not exit in time.

use super::frame::Frame;
use crate::error::Result;
use fallguard_common::db::SourceKind;
use std::fmt;
use std::sync::Arc;

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// Local camera by index (`/dev/videoN`)
    Device(u32),
    /// Network stream or file path
    Url(String),
}

impl SourceLocator {
    /// Numeric strings select a local device index; anything else is a URL
    pub fn parse(source: &str) -> Self {
        let trimmed = source.trim();
        match trimmed.parse::<u32>() {
            Ok(index) => SourceLocator::Device(index),
            Err(_) => SourceLocator::Url(trimmed.to_string()),
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Device(index) => write!(f, "device:{}", index),
            SourceLocator::Url(url) => f.write_str(url),
        }
    }
}

/// End-of-stream and read-failure policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Reconnect forever on failure
    Live,
    /// Rewind to the first frame on end-of-stream
    File,
}

impl From<SourceKind> for SourceMode {
    fn from(kind: SourceKind) -> Self {
        if kind.is_file() {
            SourceMode::File
        } else {
            SourceMode::Live
        }
    }
}

/// Thread-safe way to force a device closed from outside its capture thread
#[derive(Clone)]
pub struct ReleaseHandle(Arc<dyn Fn() + Send + Sync>);

impl ReleaseHandle {
    pub fn new(release: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(release))
    }

    /// Handle that does nothing, for devices with nothing to interrupt
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn release(&self) {
        (self.0)()
    }
}

impl fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReleaseHandle")
    }
}

/// An open decode context
pub trait CaptureDevice: Send {
    /// Read the next frame; `Ok(None)` means end of stream
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Seek back to the first frame
    fn rewind(&mut self) -> Result<()>;

    /// Handle that can interrupt a blocked `read_frame` from another thread
    fn release_handle(&self) -> ReleaseHandle;

    /// Close the device; further reads fail
    fn release(&mut self);
}

/// Opens capture devices
pub trait CaptureBackend: Send + Sync {
    fn open(&self, locator: &SourceLocator, mode: SourceMode) -> Result<Box<dyn CaptureDevice>>;
}
