//! Built-in conversion presets.
//!
//! Presets are immutable bundles of config defaults for common output
//! targets. Selecting one copies its fields into a fresh
//! [`crate::ConversionConfig`]; editing any field afterwards makes the
//! configuration "custom" from the caller's point of view, the preset
//! constant itself never changes.

use schemars::JsonSchema;
use serde::Serialize;

/// A named bundle of conversion defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub struct Preset {
    /// Stable identifier used on the command line (e.g. `sticker-512`).
    pub id: &'static str,
    /// Human-readable label.
    pub label: &'static str,
    /// Output byte budget.
    pub target_size_bytes: u64,
    /// Uniform scale cap (0 when exact dimensions are set).
    pub max_dimension: u32,
    /// Exact output width (0 = unset).
    pub exact_width: u32,
    /// Exact output height (0 = unset).
    pub exact_height: u32,
    /// Output frame rate.
    pub fps: u32,
    /// Quality ladder start (1-100).
    pub start_quality: u8,
    /// Quality ladder floor (1-100).
    pub min_quality: u8,
    /// Quality ladder step.
    pub quality_step: u8,
    /// Whether the fixed sharpen kernel is applied.
    pub sharpen: bool,
}

/// Square sticker, 512x512, 256 KiB.
pub const STICKER_512: Preset = Preset {
    id: "sticker-512",
    label: "Sticker 512px / 256 KiB",
    target_size_bytes: 256 * 1024,
    max_dimension: 0,
    exact_width: 512,
    exact_height: 512,
    fps: 30,
    start_quality: 90,
    min_quality: 40,
    quality_step: 5,
    sharpen: true,
};

/// Square emoji, 100x100, 64 KiB.
pub const EMOJI_100: Preset = Preset {
    id: "emoji-100",
    label: "Emoji 100px / 64 KiB",
    target_size_bytes: 64 * 1024,
    max_dimension: 0,
    exact_width: 100,
    exact_height: 100,
    fps: 30,
    start_quality: 90,
    min_quality: 40,
    quality_step: 5,
    sharpen: true,
};

/// Small chat attachment, aspect preserved.
pub const CHAT_SMALL: Preset = Preset {
    id: "chat-small",
    label: "Chat small 512px / 1 MiB",
    target_size_bytes: 1024 * 1024,
    max_dimension: 512,
    exact_width: 0,
    exact_height: 0,
    fps: 24,
    start_quality: 90,
    min_quality: 40,
    quality_step: 5,
    sharpen: false,
};

/// Medium chat attachment, aspect preserved.
pub const CHAT_MEDIUM: Preset = Preset {
    id: "chat-medium",
    label: "Chat medium 720px / 5 MiB",
    target_size_bytes: 5 * 1024 * 1024,
    max_dimension: 720,
    exact_width: 0,
    exact_height: 0,
    fps: 24,
    start_quality: 90,
    min_quality: 40,
    quality_step: 5,
    sharpen: false,
};

/// Wide banner, 960x320, 2 MiB.
pub const BANNER_WIDE: Preset = Preset {
    id: "banner-wide",
    label: "Banner 960x320 / 2 MiB",
    target_size_bytes: 2 * 1024 * 1024,
    max_dimension: 0,
    exact_width: 960,
    exact_height: 320,
    fps: 20,
    start_quality: 90,
    min_quality: 40,
    quality_step: 5,
    sharpen: false,
};

impl Preset {
    /// All built-in presets.
    pub const ALL: &'static [Preset] = &[
        STICKER_512,
        EMOJI_100,
        CHAT_SMALL,
        CHAT_MEDIUM,
        BANNER_WIDE,
    ];

    /// Look up a preset by its identifier.
    pub fn find(id: &str) -> Option<&'static Preset> {
        Self::ALL.iter().find(|p| p.id.eq_ignore_ascii_case(id))
    }

    /// Whether this preset forces exact output dimensions.
    pub fn has_exact_dimensions(&self) -> bool {
        self.exact_width > 0 && self.exact_height > 0
    }
}
