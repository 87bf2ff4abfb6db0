//! Shared data models for the loopfit transcoder.
//!
//! This crate provides Serde-serializable types for:
//! - Kept time segments and their canonical merge
//! - Conversion configuration and validation
//! - Color space and dither mode enums
//! - Built-in presets
//! - Probed media properties
//! - Conversion progress event schemas

pub mod color;
pub mod config;
pub mod media_info;
pub mod preset;
pub mod progress;
pub mod segment;

// Re-export common types
pub use color::{ColorSpace, DitherMode};
pub use config::{ConfigError, ConversionConfig};
pub use media_info::MediaInfo;
pub use preset::Preset;
pub use progress::{ConversionEventType, ConversionId, ConversionProgress};
pub use segment::{merge_segments, total_kept_ms, TrimSegment};
