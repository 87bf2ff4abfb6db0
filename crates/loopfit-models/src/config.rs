//! Conversion configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::{ColorSpace, DitherMode};
use crate::preset::Preset;
use crate::segment::{merge_segments, total_kept_ms, TrimSegment};

/// Default uniform scale cap in pixels
pub const DEFAULT_MAX_DIMENSION: u32 = 512;
/// Default output frame rate
pub const DEFAULT_FPS: u32 = 24;
/// Default quality ladder start
pub const DEFAULT_START_QUALITY: u8 = 90;
/// Default quality ladder floor
pub const DEFAULT_MIN_QUALITY: u8 = 40;
/// Default quality ladder step
pub const DEFAULT_QUALITY_STEP: u8 = 5;
/// Default output byte budget (1 MB)
pub const DEFAULT_TARGET_SIZE_BYTES: u64 = 1_000_000;
/// Default encoder effort (0 = fastest, 6 = smallest)
pub const DEFAULT_COMPRESSION_LEVEL: u8 = 4;

/// Upper bound of the denoise strength scale
pub const MAX_DENOISE_STRENGTH: u8 = 10;
/// Upper bound of the encoder effort scale
pub const MAX_COMPRESSION_LEVEL: u8 = 6;

/// One encode intent: everything the filter-graph builder and quality
/// search need to produce a size-constrained animated image.
///
/// Values are passed into a conversion by value and never mutated during
/// it. Either the legacy `trim_start_ms`/`trim_end_ms` pair or the
/// `segments` list describes the kept timeline; a non-empty `segments`
/// list wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversionConfig {
    /// Uniform scale cap in pixels, longest side (0 = no cap).
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// Exact output width (0 = unset). Together with `exact_height`,
    /// overrides `max_dimension` via scale-to-fill plus center-crop.
    #[serde(default)]
    pub exact_width: u32,

    /// Exact output height (0 = unset).
    #[serde(default)]
    pub exact_height: u32,

    /// Output frame rate.
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Quality ladder start (1-100, higher is better and larger).
    #[serde(default = "default_start_quality")]
    pub start_quality: u8,

    /// Quality ladder floor (1-100).
    #[serde(default = "default_min_quality")]
    pub min_quality: u8,

    /// Quality decrement between attempts.
    #[serde(default = "default_quality_step")]
    pub quality_step: u8,

    /// Output byte budget the search tries to fit under.
    #[serde(default = "default_target_size_bytes")]
    pub target_size_bytes: u64,

    /// Apply the fixed sharpen kernel.
    #[serde(default)]
    pub sharpen: bool,

    /// Animation loop count (0 = loop forever).
    #[serde(default)]
    pub loop_count: u32,

    /// Encoder effort, 0-6.
    #[serde(default = "default_compression_level")]
    pub compression_level: u8,

    /// Requested output pixel format.
    #[serde(default)]
    pub color_space: ColorSpace,

    /// Denoise strength, 0 = off, 1-10 otherwise.
    #[serde(default)]
    pub denoise_strength: u8,

    /// Dithering algorithm for palette quantization.
    #[serde(default)]
    pub dither_mode: DitherMode,

    /// Keyframe interval in frames (0 = encoder default).
    #[serde(default)]
    pub keyframe_interval: u32,

    /// Legacy single trim window start (ms).
    #[serde(default)]
    pub trim_start_ms: u64,

    /// Legacy single trim window end (ms, 0 = to end of source).
    #[serde(default)]
    pub trim_end_ms: u64,

    /// Kept timeline ranges; non-empty overrides the legacy trim pair.
    #[serde(default)]
    pub segments: Vec<TrimSegment>,
}

fn default_max_dimension() -> u32 {
    DEFAULT_MAX_DIMENSION
}
fn default_fps() -> u32 {
    DEFAULT_FPS
}
fn default_start_quality() -> u8 {
    DEFAULT_START_QUALITY
}
fn default_min_quality() -> u8 {
    DEFAULT_MIN_QUALITY
}
fn default_quality_step() -> u8 {
    DEFAULT_QUALITY_STEP
}
fn default_target_size_bytes() -> u64 {
    DEFAULT_TARGET_SIZE_BYTES
}
fn default_compression_level() -> u8 {
    DEFAULT_COMPRESSION_LEVEL
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            exact_width: 0,
            exact_height: 0,
            fps: DEFAULT_FPS,
            start_quality: DEFAULT_START_QUALITY,
            min_quality: DEFAULT_MIN_QUALITY,
            quality_step: DEFAULT_QUALITY_STEP,
            target_size_bytes: DEFAULT_TARGET_SIZE_BYTES,
            sharpen: false,
            loop_count: 0,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            color_space: ColorSpace::Auto,
            denoise_strength: 0,
            dither_mode: DitherMode::None,
            keyframe_interval: 0,
            trim_start_ms: 0,
            trim_end_ms: 0,
            segments: Vec::new(),
        }
    }
}

impl ConversionConfig {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy a preset's fields onto fresh defaults.
    pub fn from_preset(preset: &Preset) -> Self {
        Self {
            max_dimension: preset.max_dimension,
            exact_width: preset.exact_width,
            exact_height: preset.exact_height,
            fps: preset.fps,
            start_quality: preset.start_quality,
            min_quality: preset.min_quality,
            quality_step: preset.quality_step,
            target_size_bytes: preset.target_size_bytes,
            sharpen: preset.sharpen,
            ..Default::default()
        }
    }

    /// Returns a new config with an updated byte budget.
    pub fn with_target_size(mut self, bytes: u64) -> Self {
        self.target_size_bytes = bytes;
        self
    }

    /// Returns a new config with an updated quality ladder.
    pub fn with_quality_ladder(mut self, start: u8, min: u8, step: u8) -> Self {
        self.start_quality = start;
        self.min_quality = min;
        self.quality_step = step;
        self
    }

    /// Returns a new config with the given kept segments (replacing any
    /// legacy trim window).
    pub fn with_segments(mut self, segments: Vec<TrimSegment>) -> Self {
        self.segments = segments;
        self
    }

    /// Returns a new config with a legacy single trim window.
    pub fn with_trim_window(mut self, start_ms: u64, end_ms: u64) -> Self {
        self.trim_start_ms = start_ms;
        self.trim_end_ms = end_ms;
        self
    }

    /// Returns a new config with the given dither mode.
    pub fn with_dither(mut self, mode: DitherMode) -> Self {
        self.dither_mode = mode;
        self
    }

    /// Check the configuration invariants the search and builder rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_quality == 0
            || self.start_quality > 100
            || self.min_quality == 0
            || self.min_quality > 100
        {
            return Err(ConfigError::QualityOutOfRange {
                start: self.start_quality,
                min: self.min_quality,
            });
        }
        if self.start_quality < self.min_quality {
            return Err(ConfigError::QualityLadderInverted {
                start: self.start_quality,
                min: self.min_quality,
            });
        }
        if self.quality_step == 0 {
            return Err(ConfigError::ZeroQualityStep);
        }
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(ConfigError::CompressionLevelOutOfRange(
                self.compression_level,
            ));
        }
        if self.denoise_strength > MAX_DENOISE_STRENGTH {
            return Err(ConfigError::DenoiseStrengthOutOfRange(self.denoise_strength));
        }
        if self.fps == 0 {
            return Err(ConfigError::ZeroFrameRate);
        }
        for segment in &self.segments {
            if segment.end_ms < segment.start_ms {
                return Err(ConfigError::InvalidSegment {
                    start_ms: segment.start_ms,
                    end_ms: segment.end_ms,
                });
            }
        }
        // Zero-duration segments are tolerated among real ones (the
        // builder drops them), but a list of nothing else keeps no time.
        if !self.segments.is_empty() && self.segments.iter().all(TrimSegment::is_empty) {
            return Err(ConfigError::EmptyKeptTimeline);
        }
        if self.trim_end_ms > 0 && self.trim_end_ms < self.trim_start_ms {
            return Err(ConfigError::InvalidTrimWindow {
                start_ms: self.trim_start_ms,
                end_ms: self.trim_end_ms,
            });
        }
        Ok(())
    }

    /// Whether both exact output dimensions are set.
    pub fn has_exact_dimensions(&self) -> bool {
        self.exact_width > 0 && self.exact_height > 0
    }

    /// The kept timeline in canonical form.
    ///
    /// A non-empty `segments` list is merged and returned; otherwise a
    /// bounded legacy trim window becomes a single segment. An open-ended
    /// legacy window (`trim_end_ms == 0`) is not representable as a segment
    /// and yields an empty list; consumers fall back to `trim_start_ms`.
    pub fn effective_segments(&self) -> Vec<TrimSegment> {
        if !self.segments.is_empty() {
            return merge_segments(&self.segments);
        }
        if self.trim_end_ms > self.trim_start_ms {
            return vec![TrimSegment::new(self.trim_start_ms, self.trim_end_ms)];
        }
        Vec::new()
    }

    /// Total milliseconds the output will retain.
    ///
    /// Segments and the trim window win over the probed source duration;
    /// `source_duration_ms` is only the fallback for untrimmed input or an
    /// open-ended trim window. Returns 0 when nothing defines a duration.
    pub fn kept_duration_ms(&self, source_duration_ms: u64) -> u64 {
        let segments = self.effective_segments();
        if !segments.is_empty() {
            return total_kept_ms(&segments);
        }
        if self.trim_start_ms > 0 {
            return source_duration_ms.saturating_sub(self.trim_start_ms);
        }
        source_duration_ms
    }

    /// Upper bound on search attempts for this ladder.
    pub fn max_attempts(&self) -> u32 {
        let span = self.start_quality.saturating_sub(self.min_quality) as u32;
        span / self.quality_step.max(1) as u32 + 1
    }
}

/// A configuration the search refuses to start with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("quality values must be within 1-100 (start={start}, min={min})")]
    QualityOutOfRange { start: u8, min: u8 },

    #[error("start quality {start} is below min quality {min}")]
    QualityLadderInverted { start: u8, min: u8 },

    #[error("quality step must be greater than zero")]
    ZeroQualityStep,

    #[error("compression level must be within 0-6, got {0}")]
    CompressionLevelOutOfRange(u8),

    #[error("denoise strength must be within 0-10, got {0}")]
    DenoiseStrengthOutOfRange(u8),

    #[error("frame rate must be greater than zero")]
    ZeroFrameRate,

    #[error("segment end {end_ms}ms is before its start {start_ms}ms")]
    InvalidSegment { start_ms: u64, end_ms: u64 },

    #[error("segments keep no playable time")]
    EmptyKeptTimeline,

    #[error("trim end {end_ms}ms is before trim start {start_ms}ms")]
    InvalidTrimWindow { start_ms: u64, end_ms: u64 },
}
