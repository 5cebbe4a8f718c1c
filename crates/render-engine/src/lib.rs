//! Tilecast Render Engine
//!
//! Turns a grid composition into a still image or an encoded video.
//!
//! # Pipeline Architecture
//!
//! ```text
//! Composition ──► Layout (canvas + cell rects)
//!                     │
//! Assets ──► MediaLoader ──► images / VideoPlayback
//!                     │
//!                     ├── Still:        Compositor ──► PNG
//!                     │
//!                     ├── Interactive:  Compositor per tick ──► CaptureRuntime ──► webm/mp4
//!                     │
//!                     └── Batch:        ffprobe ──► filter graph (xstack) ──► ffmpeg ──► mp4
//! ```
//!
//! [`export::select_strategy`] picks the video path: interactive whenever a
//! capture runtime is available, batch for video-only compositions otherwise.

pub mod batch;
pub mod color;
pub mod compositor;
pub mod export;
pub mod font;
pub mod interactive;
pub mod jobs;
pub mod layout;
pub mod media;
pub mod playback;
pub mod probe;
pub mod recorder;
pub mod still;
pub mod surface;
pub mod timing;

pub use export::*;
