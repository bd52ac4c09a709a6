//! Pipeline orchestration
//!
//! Workers glue capture, detection, persistence and notification for one source; the
//! manager supervises them.

pub mod artifacts;
pub mod manager;
pub mod worker;

pub use artifacts::ArtifactWriter;
pub use manager::{ManagerServices, PipelineManager, PipelineSpec};
pub use worker::{PipelineSnapshot, PipelineWorker, WorkerServices, WorkerStatus};
