//! Probed input properties.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Properties of an input file, probed once per input and read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaInfo {
    /// Stored width in pixels (before rotation).
    pub width: u32,
    /// Stored height in pixels (before rotation).
    pub height: u32,
    /// Container duration in milliseconds (0 if unknown).
    pub duration_ms: u64,
    /// Overall bitrate in bits/second (0 if unknown).
    pub bitrate: u64,
    /// Display rotation in degrees (0, 90, 180 or 270).
    pub rotation: u32,
    /// Best-guess MIME type from the container format.
    pub mime_type: String,
    /// Video frame count (derived from duration and frame rate when the
    /// container does not record it).
    pub frame_count: u64,
}

impl MediaInfo {
    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }

    /// Dimensions as displayed, accounting for rotation metadata.
    pub fn display_dimensions(&self) -> (u32, u32) {
        match self.rotation {
            90 | 270 => (self.height, self.width),
            _ => (self.width, self.height),
        }
    }

    /// Whether the displayed image is taller than wide.
    pub fn is_portrait(&self) -> bool {
        let (w, h) = self.display_dimensions();
        h > w
    }
}
