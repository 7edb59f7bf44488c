//! Clipweave Common Utilities
//!
//! Shared infrastructure for all Clipweave crates:
//! - Error types and result aliases
//! - Step deadlines and cancellation
//! - Tracing/logging initialization
//! - Configuration loading

pub mod config;
pub mod deadline;
pub mod error;
pub mod logging;

pub use config::*;
pub use deadline::*;
pub use error::*;
