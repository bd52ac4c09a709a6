//! Database models and queries

pub mod events;
pub mod init;
pub mod models;
pub mod sources;

pub use init::*;
pub use models::*;
