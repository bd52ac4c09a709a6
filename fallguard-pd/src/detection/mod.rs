//! Fall detection
//!
//! - `pose`: oracle boundary types and traits
//! - `registry`: shared oracle instances keyed by model id
//! - `fall`: per-track pending/confirm/recover state machine
//! - `detector`: per-source sampling, preprocessing, annotation and clip buffering

pub mod annotate;
pub mod clip;
pub mod detector;
pub mod fall;
pub mod geometry;
pub mod http_oracle;
pub mod night;
pub mod pose;
pub mod registry;

pub use annotate::TrackMark;
pub use clip::{ClipRecorder, CompletedClip};
pub use detector::{DetectorOutput, FallDetector, TrackView};
pub use fall::{DetectedFall, FallStateMachine, FallThresholds, FallVerdict, Posture};
pub use http_oracle::{HttpOracleLoader, HttpPoseOracle};
pub use pose::{BBox, Detection, Keypoint, OracleLoader, PoseOracle};
pub use registry::ModelRegistry;
