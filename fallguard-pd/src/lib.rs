//! # Fallguard Pipeline Daemon Library (fallguard-pd)
//!
//! Concurrent fall-detection pipelines over many video sources.
//!
//! **Architecture:** one capture thread and one worker thread per source; persistence,
//! notification, reminders, acknowledgement polling and the HTTP status surface run on the
//! shared Tokio runtime.
//!
//! - `capture`: frame sources with bounded drop-oldest queues
//! - `detection`: pose oracle boundary and the per-track fall state machine
//! - `pipeline`: per-source workers and the manager supervising them
//! - `notify`: alerts, reminders and resolution polling
//! - `api`: read-only status surface

pub mod api;
pub mod capture;
pub mod config;
pub mod detection;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod state;
pub mod store;

pub use error::{Error, Result};
pub use state::SharedState;
