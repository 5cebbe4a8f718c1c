//! Tilecast Common Utilities
//!
//! Shared infrastructure for all Tilecast crates:
//! - Error taxonomy and result aliases
//! - Frame pacing and timing-drift helpers for export loops
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
