//! Filter pipeline construction.
//!
//! [`build`] turns a [`ConversionConfig`] into a [`FilterSpec`]: an ordered
//! list of abstract stages plus the timeline plan (a seek window for zero or
//! one kept segments, a stitch topology for more). The spec stays an
//! inspectable value until [`FilterSpec::render`] serializes it into FFmpeg
//! filter syntax at the execution boundary, so stage selection and ordering
//! are testable without running an encoder.

use serde::{Deserialize, Serialize};

use loopfit_models::{ColorSpace, ConversionConfig, DitherMode, TrimSegment};

/// One discrete frame-stream transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterStage {
    /// Scale so both target dimensions are covered, preserving aspect.
    ScaleToFill { width: u32, height: u32 },
    /// Crop the covered frame back to the exact target.
    CenterCrop { width: u32, height: u32 },
    /// Scale to one fixed edge, the other derived from aspect (0 = derived).
    ScaleKeepAspect { width: u32, height: u32 },
    /// Shrink until the longest edge fits the cap; never upscales.
    ScaleDownToFit { max_dimension: u32 },
    /// Resample to a fixed output frame rate.
    SetFrameRate { fps: u32 },
    /// Spatio-temporal denoise, strength 1-10.
    Denoise { strength: u8 },
    /// Fixed-kernel sharpen.
    Sharpen,
    /// Palette quantization with the given dither algorithm. Expands to a
    /// palette-generation pass feeding palette application when rendered.
    Dither { mode: DitherMode },
}

impl FilterStage {
    /// FFmpeg expression for stages that sit in a linear chain.
    ///
    /// [`FilterStage::Dither`] returns `None`: its palette pair needs
    /// labeled pads and is expanded by [`FilterSpec::render`] instead.
    fn linear_expr(&self) -> Option<String> {
        match self {
            FilterStage::ScaleToFill { width, height } => Some(format!(
                "scale={width}:{height}:force_original_aspect_ratio=increase"
            )),
            FilterStage::CenterCrop { width, height } => Some(format!("crop={width}:{height}")),
            FilterStage::ScaleKeepAspect { width, height } => Some(if *width > 0 {
                format!("scale={width}:-2")
            } else {
                format!("scale=-2:{height}")
            }),
            FilterStage::ScaleDownToFit { max_dimension } => Some(format!(
                "scale=w='min({max_dimension},iw)':h='min({max_dimension},ih)':force_original_aspect_ratio=decrease"
            )),
            FilterStage::SetFrameRate { fps } => Some(format!("fps={fps}")),
            FilterStage::Denoise { strength } => Some(format!("hqdn3d={strength}")),
            FilterStage::Sharpen => Some("unsharp=5:5:0.8:3:3:0.4".to_string()),
            FilterStage::Dither { .. } => None,
        }
    }
}

/// Seek/trim window applied input-side for zero or one kept segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekWindow {
    /// Seek position in milliseconds.
    pub start_ms: u64,
    /// Window length in milliseconds; `None` runs to the end of the source.
    pub duration_ms: Option<u64>,
}

/// Concatenation plan for multiple kept segments.
///
/// Each segment becomes a trim-and-reset-timestamps chain against the raw
/// input; the chains are concatenated in list order and the shared stage
/// list is applied exactly once after the concat, so stateful stages like
/// palette generation see the whole stitched stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StitchTopology {
    /// Kept segments in output order. Canonical (merged, non-degenerate).
    pub segments: Vec<TrimSegment>,
}

/// Encoder flags appended uniformly regardless of stitch mode. The quality
/// value is not carried here; the search supplies it per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderOptions {
    /// Encoder effort, 0-6.
    pub compression_level: u8,
    /// Animation loop count (0 = forever).
    pub loop_count: u32,
    /// Requested output pixel format.
    pub color_space: ColorSpace,
    /// Keyframe interval in frames (0 = encoder default).
    pub keyframe_interval: u32,
}

impl EncoderOptions {
    /// Convert to FFmpeg output arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec![
            "-compression_level".to_string(),
            self.compression_level.to_string(),
            "-loop".to_string(),
            self.loop_count.to_string(),
        ];

        if let Some(pix_fmt) = self.color_space.pix_fmt() {
            args.push("-pix_fmt".to_string());
            args.push(pix_fmt.to_string());
        }

        if self.keyframe_interval > 0 {
            args.push("-g".to_string());
            args.push(self.keyframe_interval.to_string());
        }

        args
    }
}

/// A rendered filter argument for the FFmpeg command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedFilter {
    /// Linear chain for `-vf`.
    Chain(String),
    /// Labeled graph for `-filter_complex`, to be mapped by output label.
    Graph { graph: String, output_label: String },
}

/// The full encode plan for one conversion: stage list, timeline plan and
/// encoder flags. Built once per conversion; every attempt reuses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Ordered stage list shared by all kept segments.
    pub stages: Vec<FilterStage>,
    /// Input-side seek window (single-segment and legacy-trim modes).
    pub seek: Option<SeekWindow>,
    /// Concat plan (multi-segment mode). Mutually exclusive with `seek`.
    pub stitch: Option<StitchTopology>,
    /// Uniform encoder flags.
    pub encoder: EncoderOptions,
}

/// Build the encode plan for a configuration.
///
/// Stage selection in fixed order: spatial, frame rate, denoise, sharpen,
/// dither. The kept timeline comes from
/// [`ConversionConfig::effective_segments`]; zero-duration segments are
/// dropped here so no zero-length trim chain reaches the encoder. Two or
/// more surviving segments produce a [`StitchTopology`], one produces a
/// [`SeekWindow`], none falls back to the legacy open-ended trim start.
pub fn build(config: &ConversionConfig) -> FilterSpec {
    let mut stages = Vec::new();

    if config.has_exact_dimensions() {
        stages.push(FilterStage::ScaleToFill {
            width: config.exact_width,
            height: config.exact_height,
        });
        stages.push(FilterStage::CenterCrop {
            width: config.exact_width,
            height: config.exact_height,
        });
    } else if config.exact_width > 0 || config.exact_height > 0 {
        stages.push(FilterStage::ScaleKeepAspect {
            width: config.exact_width,
            height: config.exact_height,
        });
    } else if config.max_dimension > 0 {
        stages.push(FilterStage::ScaleDownToFit {
            max_dimension: config.max_dimension,
        });
    }

    stages.push(FilterStage::SetFrameRate { fps: config.fps });

    if config.denoise_strength > 0 {
        stages.push(FilterStage::Denoise {
            strength: config.denoise_strength.clamp(1, 10),
        });
    }

    if config.sharpen {
        stages.push(FilterStage::Sharpen);
    }

    if config.dither_mode != DitherMode::None {
        stages.push(FilterStage::Dither {
            mode: config.dither_mode,
        });
    }

    let mut segments = config.effective_segments();
    segments.retain(|s| !s.is_empty());

    let (seek, stitch) = match segments.len() {
        0 => {
            let seek = (config.trim_start_ms > 0).then_some(SeekWindow {
                start_ms: config.trim_start_ms,
                duration_ms: None,
            });
            (seek, None)
        }
        1 => {
            let segment = segments[0];
            let seek = SeekWindow {
                start_ms: segment.start_ms,
                duration_ms: Some(segment.duration_ms()),
            };
            (Some(seek), None)
        }
        _ => (None, Some(StitchTopology { segments })),
    };

    FilterSpec {
        stages,
        seek,
        stitch,
        encoder: EncoderOptions {
            compression_level: config.compression_level,
            loop_count: config.loop_count,
            color_space: config.color_space,
            keyframe_interval: config.keyframe_interval,
        },
    }
}

impl FilterSpec {
    /// The dither mode carried by the stage list, if any.
    fn dither_mode(&self) -> Option<DitherMode> {
        self.stages.iter().find_map(|stage| match stage {
            FilterStage::Dither { mode } => Some(*mode),
            _ => None,
        })
    }

    /// The linear portion of the stage list as a comma-joined chain.
    fn linear_chain(&self) -> String {
        self.stages
            .iter()
            .filter_map(FilterStage::linear_expr)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Serialize into FFmpeg filter syntax.
    ///
    /// Returns `None` when there is nothing to filter at all. Dithering
    /// and stitching force the labeled-graph form; a plain stage list
    /// renders as a `-vf` chain.
    pub fn render(&self) -> Option<RenderedFilter> {
        let chain = self.linear_chain();
        let dither = self.dither_mode();

        match &self.stitch {
            None => match dither {
                None if chain.is_empty() => None,
                None => Some(RenderedFilter::Chain(chain)),
                Some(mode) => {
                    let mut graph = String::from("[0:v]");
                    if !chain.is_empty() {
                        graph.push_str(&chain);
                        graph.push(',');
                    }
                    graph.push_str(&palette_tail(mode));
                    graph.push_str("[vout]");
                    Some(RenderedFilter::Graph {
                        graph,
                        output_label: "vout".to_string(),
                    })
                }
            },
            Some(stitch) => {
                let mut parts = Vec::with_capacity(stitch.segments.len() + 2);
                for (i, segment) in stitch.segments.iter().enumerate() {
                    parts.push(format!(
                        "[0:v]trim=start={:.3}:end={:.3},setpts=PTS-STARTPTS[seg{i}]",
                        segment.start_ms as f64 / 1000.0,
                        segment.end_ms as f64 / 1000.0,
                    ));
                }
                let concat_inputs: String =
                    (0..stitch.segments.len()).map(|i| format!("[seg{i}]")).collect();
                parts.push(format!(
                    "{concat_inputs}concat=n={}:v=1:a=0[cat]",
                    stitch.segments.len()
                ));

                let output_label = match dither {
                    None if chain.is_empty() => "cat",
                    None => {
                        parts.push(format!("[cat]{chain}[vout]"));
                        "vout"
                    }
                    Some(mode) => {
                        let mut tail = String::from("[cat]");
                        if !chain.is_empty() {
                            tail.push_str(&chain);
                            tail.push(',');
                        }
                        tail.push_str(&palette_tail(mode));
                        tail.push_str("[vout]");
                        parts.push(tail);
                        "vout"
                    }
                };

                Some(RenderedFilter::Graph {
                    graph: parts.join(";"),
                    output_label: output_label.to_string(),
                })
            }
        }
    }
}

/// The palette-generation/palette-use pair a dither stage expands into.
fn palette_tail(mode: DitherMode) -> String {
    format!(
        "split[px][pp];[pp]palettegen=max_colors=256[pal];[px][pal]paletteuse=dither={}",
        mode.paletteuse_name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopfit_models::TrimSegment;

    fn seg(start_ms: u64, end_ms: u64) -> TrimSegment {
        TrimSegment::new(start_ms, end_ms)
    }

    fn rendered_graph(spec: &FilterSpec) -> String {
        match spec.render() {
            Some(RenderedFilter::Graph { graph, .. }) => graph,
            other => panic!("expected labeled graph, got {other:?}"),
        }
    }

    fn rendered_chain(spec: &FilterSpec) -> String {
        match spec.render() {
            Some(RenderedFilter::Chain(chain)) => chain,
            other => panic!("expected linear chain, got {other:?}"),
        }
    }

    #[test]
    fn test_exact_dimensions_scale_fill_then_crop() {
        let mut config = ConversionConfig::default();
        config.exact_width = 512;
        config.exact_height = 512;

        let spec = build(&config);
        assert_eq!(
            spec.stages[0],
            FilterStage::ScaleToFill {
                width: 512,
                height: 512
            }
        );
        assert_eq!(
            spec.stages[1],
            FilterStage::CenterCrop {
                width: 512,
                height: 512
            }
        );

        let chain = rendered_chain(&spec);
        assert!(chain.contains("scale=512:512:force_original_aspect_ratio=increase"));
        assert!(chain.contains("crop=512:512"));
    }

    #[test]
    fn test_single_exact_dimension_keeps_aspect() {
        let mut config = ConversionConfig::default();
        config.exact_width = 640;

        let spec = build(&config);
        assert_eq!(
            spec.stages[0],
            FilterStage::ScaleKeepAspect {
                width: 640,
                height: 0
            }
        );
        assert!(rendered_chain(&spec).contains("scale=640:-2"));

        let mut config = ConversionConfig::default();
        config.exact_height = 360;
        assert!(rendered_chain(&build(&config)).contains("scale=-2:360"));
    }

    #[test]
    fn test_max_dimension_only_downscales() {
        let mut config = ConversionConfig::default();
        config.max_dimension = 480;

        let chain = rendered_chain(&build(&config));
        assert!(chain.contains("min(480,iw)"));
        assert!(chain.contains("min(480,ih)"));
        assert!(chain.contains("force_original_aspect_ratio=decrease"));
    }

    #[test]
    fn test_no_spatial_stage_without_cap() {
        let mut config = ConversionConfig::default();
        config.max_dimension = 0;

        let spec = build(&config);
        assert_eq!(spec.stages[0], FilterStage::SetFrameRate { fps: config.fps });
    }

    #[test]
    fn test_stage_order_with_everything_enabled() {
        let mut config = ConversionConfig::default();
        config.exact_width = 512;
        config.exact_height = 512;
        config.fps = 30;
        config.denoise_strength = 3;
        config.sharpen = true;
        config.dither_mode = DitherMode::FloydSteinberg;

        let spec = build(&config);
        let kinds: Vec<_> = spec
            .stages
            .iter()
            .map(|s| std::mem::discriminant(s))
            .collect();
        let expected = [
            std::mem::discriminant(&FilterStage::ScaleToFill {
                width: 0,
                height: 0,
            }),
            std::mem::discriminant(&FilterStage::CenterCrop {
                width: 0,
                height: 0,
            }),
            std::mem::discriminant(&FilterStage::SetFrameRate { fps: 0 }),
            std::mem::discriminant(&FilterStage::Denoise { strength: 0 }),
            std::mem::discriminant(&FilterStage::Sharpen),
            std::mem::discriminant(&FilterStage::Dither {
                mode: DitherMode::None,
            }),
        ];
        assert_eq!(kinds, expected);
    }

    #[test]
    fn test_denoise_clamped_and_gated() {
        let mut config = ConversionConfig::default();
        config.denoise_strength = 0;
        assert!(!build(&config)
            .stages
            .iter()
            .any(|s| matches!(s, FilterStage::Denoise { .. })));

        // Out-of-scale values are clamped when the stage list is built,
        // independent of config validation.
        config.denoise_strength = 40;
        assert!(build(&config)
            .stages
            .contains(&FilterStage::Denoise { strength: 10 }));
    }

    #[test]
    fn test_dither_renders_palette_pair() {
        let mut config = ConversionConfig::default();
        config.dither_mode = DitherMode::Sierra;

        let spec = build(&config);
        let graph = rendered_graph(&spec);
        assert!(graph.starts_with("[0:v]"));
        assert!(graph.contains("palettegen=max_colors=256"));
        assert!(graph.contains("paletteuse=dither=sierra2"));
        assert!(graph.ends_with("[vout]"));
        // palettegen must run before paletteuse
        assert!(graph.find("palettegen").unwrap() < graph.find("paletteuse").unwrap());
    }

    #[test]
    fn test_plain_stages_render_as_chain() {
        let config = ConversionConfig::default();
        let chain = rendered_chain(&build(&config));
        assert!(chain.contains("fps=24"));
        assert!(!chain.contains(';'));
    }

    #[test]
    fn test_single_segment_becomes_seek_window() {
        let config = ConversionConfig::default().with_segments(vec![seg(2000, 7000)]);

        let spec = build(&config);
        assert!(spec.stitch.is_none());
        assert_eq!(
            spec.seek,
            Some(SeekWindow {
                start_ms: 2000,
                duration_ms: Some(5000),
            })
        );
    }

    #[test]
    fn test_legacy_trim_window() {
        let config = ConversionConfig::default().with_trim_window(1000, 4000);
        let spec = build(&config);
        assert_eq!(
            spec.seek,
            Some(SeekWindow {
                start_ms: 1000,
                duration_ms: Some(3000),
            })
        );

        // Open-ended trim: seek only
        let config = ConversionConfig::default().with_trim_window(1000, 0);
        let spec = build(&config);
        assert_eq!(
            spec.seek,
            Some(SeekWindow {
                start_ms: 1000,
                duration_ms: None,
            })
        );
    }

    #[test]
    fn test_multi_segment_builds_stitch() {
        let config =
            ConversionConfig::default().with_segments(vec![seg(0, 3000), seg(5000, 8000)]);

        let spec = build(&config);
        assert!(spec.seek.is_none());
        let stitch = spec.stitch.as_ref().unwrap();
        assert_eq!(stitch.segments, vec![seg(0, 3000), seg(5000, 8000)]);

        let graph = rendered_graph(&spec);
        assert!(graph.contains("[0:v]trim=start=0.000:end=3.000,setpts=PTS-STARTPTS[seg0]"));
        assert!(graph.contains("[0:v]trim=start=5.000:end=8.000,setpts=PTS-STARTPTS[seg1]"));
        assert!(graph.contains("[seg0][seg1]concat=n=2:v=1:a=0[cat]"));
    }

    #[test]
    fn test_stitch_applies_stages_once_after_concat() {
        let mut config =
            ConversionConfig::default().with_segments(vec![seg(0, 3000), seg(5000, 8000)]);
        config.fps = 30;

        let graph = rendered_graph(&build(&config));
        assert_eq!(graph.matches("fps=30").count(), 1);
        assert!(graph.find("concat").unwrap() < graph.find("fps=30").unwrap());
    }

    #[test]
    fn test_stitch_with_dither_palettegen_after_concat() {
        let mut config =
            ConversionConfig::default().with_segments(vec![seg(0, 1000), seg(2000, 3000)]);
        config.dither_mode = DitherMode::Bayer;

        let graph = rendered_graph(&build(&config));
        assert_eq!(graph.matches("palettegen").count(), 1);
        assert!(graph.find("concat").unwrap() < graph.find("palettegen").unwrap());
        assert!(graph.contains("paletteuse=dither=bayer"));
    }

    #[test]
    fn test_zero_duration_segment_dropped_before_stitch() {
        let config = ConversionConfig::default()
            .with_segments(vec![seg(0, 1000), seg(5000, 5000), seg(7000, 9000)]);

        let spec = build(&config);
        let stitch = spec.stitch.as_ref().unwrap();
        assert_eq!(stitch.segments, vec![seg(0, 1000), seg(7000, 9000)]);
    }

    #[test]
    fn test_dropping_degenerate_segment_demotes_to_seek() {
        let config =
            ConversionConfig::default().with_segments(vec![seg(0, 1000), seg(5000, 5000)]);

        let spec = build(&config);
        assert!(spec.stitch.is_none());
        assert_eq!(
            spec.seek,
            Some(SeekWindow {
                start_ms: 0,
                duration_ms: Some(1000),
            })
        );
    }

    #[test]
    fn test_encoder_args() {
        let mut config = ConversionConfig::default();
        config.compression_level = 6;
        config.loop_count = 3;
        config.color_space = ColorSpace::Yuv420;
        config.keyframe_interval = 0;

        let args = build(&config).encoder.to_ffmpeg_args();
        assert!(args.contains(&"-compression_level".to_string()));
        assert!(args.contains(&"6".to_string()));
        assert!(args.contains(&"-loop".to_string()));
        assert!(args.contains(&"3".to_string()));
        assert!(args.contains(&"-pix_fmt".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
        assert!(!args.contains(&"-g".to_string()));

        config.keyframe_interval = 60;
        let args = build(&config).encoder.to_ffmpeg_args();
        assert!(args.contains(&"-g".to_string()));
        assert!(args.contains(&"60".to_string()));
    }

    #[test]
    fn test_encoder_auto_color_space_has_no_pix_fmt() {
        let config = ConversionConfig::default();
        let args = build(&config).encoder.to_ffmpeg_args();
        assert!(!args.contains(&"-pix_fmt".to_string()));
    }

    #[test]
    fn test_spec_is_serializable() {
        let config = ConversionConfig::default().with_segments(vec![seg(0, 1000), seg(2000, 3000)]);
        let spec = build(&config);
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"kind\":\"set_frame_rate\""));
        let back: FilterSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
