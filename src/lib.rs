//! Multi-monitor desktop duplication capture.
//!
//! A [`CaptureEngine`] maps a rectangle of the virtual desktop onto every
//! output it overlaps, keeps one change-stream per output, composites the
//! changed regions into a single surface, overlays the pointer and emits
//! BGRA frames at a constant rate.

pub mod backend;
pub mod cursor;
pub mod engine;
pub(crate) mod env_config;
pub mod error;
pub mod geometry;
#[cfg(test)]
pub(crate) mod mock;
pub mod pacing;
mod platform;
pub mod region;
pub mod source;
pub mod surface;

pub use backend::CaptureBackend;
pub use engine::{
    CaptureConfig, CaptureEngine, CaptureEngineBuilder, CapturedFrame, FrameTimings, StreamInfo,
    list_sources, list_sources_with,
};
pub use error::{CaptureError, CaptureErrorClass, CaptureResult};
pub use geometry::{CaptureTarget, DesktopRect};
pub use pacing::Framerate;
pub use source::{CaptureSource, SourceDescriptor, SourceRotation};
