//! Output color space and dithering mode definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Pixel format requested for the encoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    /// Let the encoder pick
    #[default]
    Auto,
    /// 4:2:0 chroma subsampling, smallest output
    Yuv420,
    /// 4:4:4 full chroma, sharper color edges
    Yuv444,
    /// RGB with alpha, largest output
    Rgb,
}

impl ColorSpace {
    pub const ALL: &'static [ColorSpace] = &[
        ColorSpace::Auto,
        ColorSpace::Yuv420,
        ColorSpace::Yuv444,
        ColorSpace::Rgb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorSpace::Auto => "auto",
            ColorSpace::Yuv420 => "yuv420",
            ColorSpace::Yuv444 => "yuv444",
            ColorSpace::Rgb => "rgb",
        }
    }

    /// The FFmpeg pixel format name, or `None` for [`ColorSpace::Auto`].
    pub fn pix_fmt(&self) -> Option<&'static str> {
        match self {
            ColorSpace::Auto => None,
            ColorSpace::Yuv420 => Some("yuv420p"),
            ColorSpace::Yuv444 => Some("yuv444p"),
            ColorSpace::Rgb => Some("rgba"),
        }
    }
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ColorSpace {
    type Err = ColorSpaceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ColorSpace::Auto),
            "yuv420" => Ok(ColorSpace::Yuv420),
            "yuv444" => Ok(ColorSpace::Yuv444),
            "rgb" => Ok(ColorSpace::Rgb),
            _ => Err(ColorSpaceParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown color space: {0}")]
pub struct ColorSpaceParseError(String);

/// Dithering algorithm applied during palette quantization.
///
/// Any mode other than [`DitherMode::None`] adds a palette-generation pass
/// ahead of palette application in the filter pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DitherMode {
    /// No palette pass
    #[default]
    None,
    /// Ordered Bayer matrix, fast with a visible crosshatch pattern
    Bayer,
    /// Floyd-Steinberg error diffusion
    FloydSteinberg,
    /// Two-row Sierra error diffusion
    Sierra,
}

impl DitherMode {
    pub const ALL: &'static [DitherMode] = &[
        DitherMode::None,
        DitherMode::Bayer,
        DitherMode::FloydSteinberg,
        DitherMode::Sierra,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DitherMode::None => "none",
            DitherMode::Bayer => "bayer",
            DitherMode::FloydSteinberg => "floyd_steinberg",
            DitherMode::Sierra => "sierra",
        }
    }

    /// The algorithm name FFmpeg's `paletteuse` filter expects.
    ///
    /// Meaningless for [`DitherMode::None`], which emits no palette pass.
    pub fn paletteuse_name(&self) -> &'static str {
        match self {
            DitherMode::None => "none",
            DitherMode::Bayer => "bayer",
            DitherMode::FloydSteinberg => "floyd_steinberg",
            DitherMode::Sierra => "sierra2",
        }
    }
}

impl fmt::Display for DitherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DitherMode {
    type Err = DitherModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(DitherMode::None),
            "bayer" => Ok(DitherMode::Bayer),
            "floyd_steinberg" | "floyd-steinberg" => Ok(DitherMode::FloydSteinberg),
            "sierra" => Ok(DitherMode::Sierra),
            _ => Err(DitherModeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown dither mode: {0}")]
pub struct DitherModeParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_space_parse() {
        assert_eq!("yuv420".parse::<ColorSpace>().unwrap(), ColorSpace::Yuv420);
        assert_eq!("RGB".parse::<ColorSpace>().unwrap(), ColorSpace::Rgb);
        assert!("cmyk".parse::<ColorSpace>().is_err());
    }

    #[test]
    fn test_color_space_pix_fmt() {
        assert_eq!(ColorSpace::Auto.pix_fmt(), None);
        assert_eq!(ColorSpace::Yuv420.pix_fmt(), Some("yuv420p"));
        assert_eq!(ColorSpace::Rgb.pix_fmt(), Some("rgba"));
    }

    #[test]
    fn test_dither_mode_parse() {
        assert_eq!(
            "floyd_steinberg".parse::<DitherMode>().unwrap(),
            DitherMode::FloydSteinberg
        );
        assert_eq!(
            "floyd-steinberg".parse::<DitherMode>().unwrap(),
            DitherMode::FloydSteinberg
        );
        assert!("ordered8".parse::<DitherMode>().is_err());
    }

    #[test]
    fn test_dither_paletteuse_name() {
        assert_eq!(DitherMode::Sierra.paletteuse_name(), "sierra2");
        assert_eq!(DitherMode::Bayer.paletteuse_name(), "bayer");
    }

    #[test]
    fn test_display_roundtrip() {
        for cs in ColorSpace::ALL {
            assert_eq!(cs.to_string().parse::<ColorSpace>().unwrap(), *cs);
        }
        for dm in DitherMode::ALL {
            assert_eq!(dm.to_string().parse::<DitherMode>().unwrap(), *dm);
        }
    }
}
