//! # Fallguard Common Library
//!
//! Shared code for the Fallguard services:
//! - Database bootstrap, models and queries
//! - System event types broadcast to status subscribers
//! - Configuration loading and the notification credential cascade
//! - Time utilities

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
