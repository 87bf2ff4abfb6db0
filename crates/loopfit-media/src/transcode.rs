//! Encode attempt execution.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::filtergraph::{FilterSpec, RenderedFilter};
use crate::progress::StatsCallback;

/// Animated WebP encoder/muxer.
const OUTPUT_CODEC: &str = "libwebp_anim";

/// One encode attempt against an external transcoder.
///
/// The quality search drives this once per ladder rung, always
/// sequentially. Implementations must honor the cancel flag by killing
/// work in flight, and on success return the bytes written to `output`.
/// Production code uses [`FfmpegTranscoder`]; tests script outcomes
/// instead of encoding.
#[async_trait]
pub trait TranscodeExecutor: Send + Sync {
    /// Encode `input` to `output` at the given quality, reporting encoder
    /// stats through `on_stats`.
    async fn execute(
        &self,
        input: &Path,
        output: &Path,
        spec: &FilterSpec,
        quality: u8,
        cancel: watch::Receiver<bool>,
        on_stats: StatsCallback,
    ) -> MediaResult<u64>;
}

/// [`TranscodeExecutor`] backed by the ffmpeg binary.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    /// Wall-clock limit per attempt in seconds (None = unlimited).
    timeout_secs: Option<u64>,
}

impl FfmpegTranscoder {
    /// Create a transcoder with no attempt timeout.
    pub fn new() -> Self {
        Self { timeout_secs: None }
    }

    /// Limit each attempt's wall-clock time.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Assemble the FFmpeg invocation for one attempt.
    ///
    /// Everything but the quality flag comes from the [`FilterSpec`], so
    /// consecutive attempts differ only in that value.
    fn command_for_attempt(
        &self,
        input: &Path,
        output: &Path,
        spec: &FilterSpec,
        quality: u8,
    ) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(input, output);

        if let Some(seek) = &spec.seek {
            if seek.start_ms > 0 {
                cmd = cmd.seek(seek.start_ms as f64 / 1000.0);
            }
            if let Some(duration_ms) = seek.duration_ms {
                cmd = cmd.duration(duration_ms as f64 / 1000.0);
            }
        }

        cmd = match spec.render() {
            Some(RenderedFilter::Chain(chain)) => cmd.video_filter(chain),
            Some(RenderedFilter::Graph {
                graph,
                output_label,
            }) => cmd.filter_complex(graph).map(output_label),
            None => cmd,
        };

        cmd.video_codec(OUTPUT_CODEC)
            .quality(quality)
            .output_args(spec.encoder.to_ffmpeg_args())
            .no_audio()
    }
}

#[async_trait]
impl TranscodeExecutor for FfmpegTranscoder {
    async fn execute(
        &self,
        input: &Path,
        output: &Path,
        spec: &FilterSpec,
        quality: u8,
        cancel: watch::Receiver<bool>,
        on_stats: StatsCallback,
    ) -> MediaResult<u64> {
        let cmd = self.command_for_attempt(input, output, spec, quality);

        let mut runner = FfmpegRunner::new().with_cancel(cancel);
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }

        runner.run_with_progress(&cmd, on_stats).await?;

        let bytes = tokio::fs::metadata(output).await?.len();
        debug!(quality, bytes, "encode attempt finished");
        Ok(bytes)
    }
}
