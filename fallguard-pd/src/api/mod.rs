//! Status surface over HTTP
//!
//! Unauthenticated and read-only; bind it to a trusted interface.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, run, AppContext};
