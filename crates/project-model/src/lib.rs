//! Tilecast Project Model
//!
//! Defines the core data contracts for Tilecast projects:
//! - **Assets:** Imported media references (video, image, logo, audio)
//! - **Composition:** Grid geometry and visual styling
//! - **Tracks:** Per-cell asset bindings with trim/transform/volume state
//! - **Export:** Export settings, presets, and render-job records
//!
//! Cells are identified by zero-based row-major indices.

pub mod export;
pub mod project;

pub use export::*;
pub use project::*;
