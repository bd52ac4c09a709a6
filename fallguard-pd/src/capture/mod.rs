//! Frame capture
//!
//! One [`FrameSource`] per video source: a capture thread decoding frames into a bounded,
//! drop-oldest [`FrameQueue`] that the pipeline worker polls without blocking.

pub mod device;
pub mod ffmpeg;
pub mod frame;
pub mod queue;
pub mod source;

pub use device::{CaptureBackend, CaptureDevice, ReleaseHandle, SourceLocator, SourceMode};
pub use ffmpeg::FfmpegBackend;
pub use frame::Frame;
pub use queue::{FrameQueue, DEFAULT_QUEUE_CAPACITY};
pub use source::{CaptureStatsSnapshot, FrameSource};
