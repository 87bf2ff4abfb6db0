//! Command-line converter binary.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use loopfit_media::{probe_media, Converter, FfmpegTranscoder};
use loopfit_models::{
    ColorSpace, ConversionConfig, ConversionProgress, DitherMode, Preset, TrimSegment,
};

#[derive(Parser)]
#[command(
    name = "loopfit",
    version,
    about = "Fit video clips into size-budgeted animated images"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a video into an animated image under a byte budget
    Convert(ConvertArgs),

    /// Inspect a media file and print what a conversion would see
    Probe {
        /// Source video
        input: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the built-in presets
    Presets,
}

#[derive(Args)]
struct ConvertArgs {
    /// Source video
    input: PathBuf,

    /// Output animated image path
    output: PathBuf,

    /// Start from a preset (see `loopfit presets`); flags below override it
    #[arg(long)]
    preset: Option<String>,

    /// Output byte budget
    #[arg(long)]
    target_size: Option<u64>,

    /// Longest-edge cap in pixels (0 = no cap)
    #[arg(long)]
    max_dimension: Option<u32>,

    /// Exact output width
    #[arg(long)]
    width: Option<u32>,

    /// Exact output height
    #[arg(long)]
    height: Option<u32>,

    /// Output frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Quality ladder start (1-100)
    #[arg(long)]
    start_quality: Option<u8>,

    /// Quality ladder floor (1-100)
    #[arg(long)]
    min_quality: Option<u8>,

    /// Quality decrement between attempts
    #[arg(long)]
    quality_step: Option<u8>,

    /// Denoise strength (1-10)
    #[arg(long)]
    denoise: Option<u8>,

    /// Apply the fixed sharpen kernel
    #[arg(long)]
    sharpen: bool,

    /// Dither algorithm: none, bayer, floyd_steinberg, sierra
    #[arg(long)]
    dither: Option<DitherMode>,

    /// Output pixel format: auto, yuv420, yuv444, rgb
    #[arg(long)]
    color_space: Option<ColorSpace>,

    /// Animation loop count (0 = forever)
    #[arg(long)]
    loops: Option<u32>,

    /// Encoder effort (0 = fastest, 6 = smallest)
    #[arg(long)]
    compression_level: Option<u8>,

    /// Keyframe interval in frames (0 = encoder default)
    #[arg(long)]
    keyframe_interval: Option<u32>,

    /// Keep only from this timestamp (ms)
    #[arg(long)]
    trim_start: Option<u64>,

    /// Keep only until this timestamp (ms)
    #[arg(long)]
    trim_end: Option<u64>,

    /// Kept range as START-END milliseconds; repeat to stitch several,
    /// e.g. --segment 0-3000 --segment 5000-8000
    #[arg(long = "segment", value_parser = parse_segment)]
    segments: Vec<TrimSegment>,

    /// Wall-clock limit per encode attempt in seconds
    #[arg(long)]
    attempt_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Convert(args) => run_convert(args).await,
        Command::Probe { input, json } => run_probe(input, json).await,
        Command::Presets => {
            run_presets();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing with colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("loopfit_cli=info".parse().unwrap())
        .add_directive("loopfit_media=info".parse().unwrap())
        .add_directive("loopfit_models=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Run a conversion to completion, mapping its outcome to an exit code:
/// 0 on any produced output, 1 on failure, 130 when interrupted.
async fn run_convert(args: ConvertArgs) -> anyhow::Result<ExitCode> {
    let config = build_config(&args)?;
    config.validate()?;

    let source = probe_media(&args.input).await?;
    info!(
        width = source.width,
        height = source.height,
        duration_ms = source.duration_ms,
        "probed source"
    );

    let mut transcoder = FfmpegTranscoder::new();
    if let Some(secs) = args.attempt_timeout {
        transcoder = transcoder.with_timeout(secs);
    }
    let converter = Converter::with_executor(transcoder);

    let mut conversion = converter.convert(config, &args.input, &args.output, source)?;

    // Ctrl-C requests cooperative cancellation; the ladder kills any
    // encode in flight and the event stream ends without a terminal event.
    let handle = conversion.handle.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling conversion");
            handle.cancel();
        }
    });

    let mut exit = ExitCode::from(130);
    while let Some(event) = conversion.events.recv().await {
        match event {
            ConversionProgress::Attempt {
                quality,
                attempt_number,
            } => info!(quality, attempt = attempt_number, "encoding attempt"),
            ConversionProgress::Progress {
                fraction,
                quality,
                attempt_number,
                elapsed_ms,
            } => debug!(
                percent = (fraction * 100.0) as u32,
                quality,
                attempt = attempt_number,
                elapsed_ms,
                "encoding"
            ),
            ConversionProgress::SizeExceeded {
                quality,
                output_bytes,
            } => info!(quality, output_bytes, "attempt exceeded byte budget"),
            ConversionProgress::Complete {
                quality,
                output_bytes,
            } => {
                info!(
                    quality,
                    output_bytes,
                    output = %args.output.display(),
                    "conversion complete"
                );
                exit = ExitCode::SUCCESS;
            }
            ConversionProgress::CompletedOversize {
                quality,
                output_bytes,
                target_size_bytes,
            } => {
                warn!(
                    quality,
                    output_bytes,
                    target_size_bytes,
                    output = %args.output.display(),
                    "budget not met; kept the smallest attempt"
                );
                exit = ExitCode::SUCCESS;
            }
            ConversionProgress::Failed { reason } => {
                error!(%reason, "conversion failed");
                exit = ExitCode::FAILURE;
            }
        }
    }
    interrupt.abort();

    Ok(exit)
}

/// Merge preset and flag overrides into a configuration.
fn build_config(args: &ConvertArgs) -> anyhow::Result<ConversionConfig> {
    let mut config = match &args.preset {
        Some(id) => {
            let preset = Preset::find(id)
                .ok_or_else(|| anyhow::anyhow!("unknown preset '{id}', see `loopfit presets`"))?;
            ConversionConfig::from_preset(preset)
        }
        None => ConversionConfig::default(),
    };

    if let Some(v) = args.target_size {
        config.target_size_bytes = v;
    }
    if let Some(v) = args.max_dimension {
        config.max_dimension = v;
    }
    if let Some(v) = args.width {
        config.exact_width = v;
    }
    if let Some(v) = args.height {
        config.exact_height = v;
    }
    if let Some(v) = args.fps {
        config.fps = v;
    }
    if let Some(v) = args.start_quality {
        config.start_quality = v;
    }
    if let Some(v) = args.min_quality {
        config.min_quality = v;
    }
    if let Some(v) = args.quality_step {
        config.quality_step = v;
    }
    if let Some(v) = args.denoise {
        config.denoise_strength = v;
    }
    if args.sharpen {
        config.sharpen = true;
    }
    if let Some(v) = args.dither {
        config.dither_mode = v;
    }
    if let Some(v) = args.color_space {
        config.color_space = v;
    }
    if let Some(v) = args.loops {
        config.loop_count = v;
    }
    if let Some(v) = args.compression_level {
        config.compression_level = v;
    }
    if let Some(v) = args.keyframe_interval {
        config.keyframe_interval = v;
    }
    if let Some(v) = args.trim_start {
        config.trim_start_ms = v;
    }
    if let Some(v) = args.trim_end {
        config.trim_end_ms = v;
    }
    if !args.segments.is_empty() {
        config.segments = args.segments.clone();
    }

    Ok(config)
}

/// Probe a file and print the conversion-relevant facts.
async fn run_probe(input: PathBuf, json: bool) -> anyhow::Result<ExitCode> {
    let info = probe_media(&input).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        let (width, height) = info.display_dimensions();
        println!("dimensions: {}x{}", width, height);
        println!("duration:   {:.3}s", info.duration_secs());
        println!("frames:     {}", info.frame_count);
        println!("bitrate:    {} b/s", info.bitrate);
        println!("rotation:   {} deg", info.rotation);
        println!("container:  {}", info.mime_type);
    }

    Ok(ExitCode::SUCCESS)
}

/// Print the preset table.
fn run_presets() {
    for preset in Preset::ALL {
        println!(
            "{:<12} {:>9}  {}",
            preset.id,
            format_size(preset.target_size_bytes),
            preset.label
        );
    }
}

/// Parse a `START-END` millisecond pair.
fn parse_segment(value: &str) -> Result<TrimSegment, String> {
    let (start, end) = value
        .split_once('-')
        .ok_or_else(|| format!("expected START-END in milliseconds, got '{value}'"))?;
    let start_ms: u64 = start
        .trim()
        .parse()
        .map_err(|_| format!("invalid start '{start}'"))?;
    let end_ms: u64 = end
        .trim()
        .parse()
        .map_err(|_| format!("invalid end '{end}'"))?;
    if end_ms < start_ms {
        return Err(format!("segment end {end_ms} is before start {start_ms}"));
    }
    Ok(TrimSegment::new(start_ms, end_ms))
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{bytes} B")
    }
}
