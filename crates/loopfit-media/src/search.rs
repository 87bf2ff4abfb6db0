//! Quality ladder search.
//!
//! A conversion encodes the same plan at descending quality until an
//! attempt fits the byte budget, streaming lifecycle and progress events
//! to a single consumer. [`Converter::convert`] validates up front, spawns
//! the ladder in the background and hands back a [`Conversion`] holding
//! the event stream and a cancellation handle. All encode scratch lives in
//! a per-conversion temp directory that is removed on every exit path; the
//! best attempt is only moved to the caller's output path when the run
//! ends in `Complete` or `CompletedOversize`.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::Stream;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use loopfit_models::{ConversionConfig, ConversionId, ConversionProgress, MediaInfo};

use crate::error::{MediaError, MediaResult};
use crate::filtergraph::{self, FilterSpec};
use crate::fs_utils;
use crate::progress::StatsCallback;
use crate::transcode::{FfmpegTranscoder, TranscodeExecutor};

/// Event channel capacity. Lifecycle events block the ladder until the
/// consumer has room; progress events are dropped instead.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Ordered event stream for one conversion.
///
/// Ends after the terminal event, or without one when the conversion was
/// cancelled.
pub struct ProgressStream {
    rx: mpsc::Receiver<ConversionProgress>,
}

impl ProgressStream {
    /// Receive the next event; `None` once the conversion is over.
    pub async fn recv(&mut self) -> Option<ConversionProgress> {
        self.rx.recv().await
    }
}

impl Stream for ProgressStream {
    type Item = ConversionProgress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Cancellation handle for a running conversion.
///
/// Dropping the handle does not cancel; only an explicit [`cancel`] call
/// does. Cancellation kills any encode in flight and ends the event
/// stream without a terminal event.
///
/// [`cancel`]: ConversionHandle::cancel
#[derive(Debug, Clone)]
pub struct ConversionHandle {
    id: ConversionId,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl ConversionHandle {
    /// The conversion this handle controls.
    pub fn id(&self) -> &ConversionId {
        &self.id
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

/// A running conversion.
pub struct Conversion {
    /// Identifier shared with logs and the handle.
    pub id: ConversionId,
    /// Ordered single-consumer event stream.
    pub events: ProgressStream,
    /// Cancellation handle; cheap to clone and hand elsewhere.
    pub handle: ConversionHandle,
}

/// Runs size-constrained conversions.
pub struct Converter<E: TranscodeExecutor + 'static> {
    executor: Arc<E>,
}

impl Converter<FfmpegTranscoder> {
    /// Converter backed by the ffmpeg binary.
    pub fn new() -> Self {
        Self::with_executor(FfmpegTranscoder::new())
    }
}

impl Default for Converter<FfmpegTranscoder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: TranscodeExecutor + 'static> Converter<E> {
    /// Converter with a custom attempt executor.
    pub fn with_executor(executor: E) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    /// Start a conversion of `input` into `output`.
    ///
    /// Configuration problems and scratch-space failures surface here as
    /// errors; everything after this call is reported through the event
    /// stream. `source` comes from a prior probe of `input`.
    pub fn convert(
        &self,
        config: ConversionConfig,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        source: MediaInfo,
    ) -> MediaResult<Conversion> {
        config.validate()?;

        let scratch = TempDir::new()?;
        let spec = filtergraph::build(&config);
        let id = ConversionId::new();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        info!(
            id = %id,
            target_size_bytes = config.target_size_bytes,
            start_quality = config.start_quality,
            min_quality = config.min_quality,
            "starting conversion"
        );

        let ladder = LadderRun {
            id: id.clone(),
            config,
            spec,
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            source,
            scratch,
            executor: Arc::clone(&self.executor),
            events: event_tx,
            cancel: cancel_rx,
        };
        tokio::spawn(ladder.run());

        let handle = ConversionHandle {
            id: id.clone(),
            cancel_tx: Arc::new(cancel_tx),
        };
        Ok(Conversion {
            id,
            events: ProgressStream { rx: event_rx },
            handle,
        })
    }
}

/// The best successful attempt so far, kept in scratch space until the
/// run settles.
struct BestAttempt {
    quality: u8,
    bytes: u64,
    path: PathBuf,
}

/// State for one background ladder task.
struct LadderRun<E: TranscodeExecutor> {
    id: ConversionId,
    config: ConversionConfig,
    spec: FilterSpec,
    input: PathBuf,
    output: PathBuf,
    source: MediaInfo,
    scratch: TempDir,
    executor: Arc<E>,
    events: mpsc::Sender<ConversionProgress>,
    cancel: watch::Receiver<bool>,
}

impl<E: TranscodeExecutor> LadderRun<E> {
    /// Walk the quality ladder until fit, exhaustion, failure or
    /// cancellation. Dropping `self` removes the scratch directory, so
    /// every return cleans up.
    async fn run(self) {
        let started = Instant::now();
        let kept_ms = self.config.kept_duration_ms(self.source.duration_ms);

        let mut best: Option<BestAttempt> = None;
        let mut failure: Option<MediaError> = None;
        let mut quality = self.config.start_quality;
        let mut attempt_number: u32 = 0;

        loop {
            if *self.cancel.borrow() {
                debug!(id = %self.id, "conversion cancelled");
                return;
            }

            attempt_number += 1;
            if !self
                .emit(ConversionProgress::attempt(quality, attempt_number))
                .await
            {
                return;
            }

            let attempt_path = self
                .scratch
                .path()
                .join(format!("attempt-{attempt_number}.webp"));
            let result = self
                .executor
                .execute(
                    &self.input,
                    &attempt_path,
                    &self.spec,
                    quality,
                    self.cancel.clone(),
                    self.stats_callback(quality, attempt_number, started, kept_ms),
                )
                .await;

            match result {
                Ok(0) => {
                    warn!(id = %self.id, quality, "attempt produced an empty file");
                    failure = Some(MediaError::internal("encoder produced an empty file"));
                    break;
                }
                Ok(bytes) => {
                    debug!(id = %self.id, quality, bytes, "attempt succeeded");
                    best = Some(BestAttempt {
                        quality,
                        bytes,
                        path: attempt_path,
                    });

                    if bytes <= self.config.target_size_bytes {
                        break;
                    }

                    if !self
                        .emit(ConversionProgress::size_exceeded(quality, bytes))
                        .await
                    {
                        return;
                    }

                    match quality.checked_sub(self.config.quality_step) {
                        Some(next) if next >= self.config.min_quality => quality = next,
                        _ => break,
                    }
                }
                Err(err) if err.is_cancelled() => {
                    debug!(id = %self.id, "conversion cancelled mid-attempt");
                    return;
                }
                Err(err) => {
                    warn!(id = %self.id, quality, error = %err, "encode attempt failed");
                    failure = Some(err);
                    break;
                }
            }
        }

        self.finish(best, failure).await;
    }

    /// Promote the best attempt and emit the terminal event.
    async fn finish(self, best: Option<BestAttempt>, failure: Option<MediaError>) {
        // A cancellation that raced the final attempt still wins: no
        // terminal event, no stable output.
        if *self.cancel.borrow() {
            debug!(id = %self.id, "conversion cancelled before completion");
            return;
        }

        let Some(best) = best else {
            let reason = failure
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no usable output produced".to_string());
            warn!(id = %self.id, reason = %reason, "conversion failed");
            let _ = self.emit(ConversionProgress::failed(reason)).await;
            return;
        };

        if let Err(err) = fs_utils::move_file(&best.path, &self.output).await {
            warn!(id = %self.id, error = %err, "could not place output");
            let _ = self
                .emit(ConversionProgress::failed(format!(
                    "could not place output: {err}"
                )))
                .await;
            return;
        }

        if best.bytes <= self.config.target_size_bytes {
            info!(
                id = %self.id,
                quality = best.quality,
                bytes = best.bytes,
                "conversion complete"
            );
            let _ = self
                .emit(ConversionProgress::complete(best.quality, best.bytes))
                .await;
        } else {
            info!(
                id = %self.id,
                quality = best.quality,
                bytes = best.bytes,
                target = self.config.target_size_bytes,
                "conversion complete above byte budget"
            );
            let _ = self
                .emit(ConversionProgress::completed_oversize(
                    best.quality,
                    best.bytes,
                    self.config.target_size_bytes,
                ))
                .await;
        }
    }

    /// Send a lifecycle event; false when the consumer is gone.
    async fn emit(&self, event: ConversionProgress) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Per-attempt encoder stats bridge.
    ///
    /// Translates raw encoder position into a progress fraction of the
    /// kept duration. Delivery is lossy under backpressure.
    fn stats_callback(
        &self,
        quality: u8,
        attempt_number: u32,
        started: Instant,
        kept_ms: u64,
    ) -> StatsCallback {
        let events = self.events.clone();
        Box::new(move |stats| {
            let fraction = stats.fraction(kept_ms);
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let _ = events.try_send(ConversionProgress::progress(
                fraction,
                quality,
                attempt_number,
                elapsed_ms,
            ));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::FfmpegProgress;
    use async_trait::async_trait;
    use loopfit_models::ConversionEventType;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum FakeOutcome {
        /// Succeed with an output of this many bytes.
        Bytes(u64),
        /// Report one stats block, then succeed with this many bytes.
        Stats { out_time_ms: i64, bytes: u64 },
        /// Fail the attempt.
        Fail(&'static str),
        /// Park until the cancel flag turns true.
        BlockUntilCancel,
    }

    #[derive(Clone, Default)]
    struct FakeExecutor {
        script: Arc<Mutex<VecDeque<FakeOutcome>>>,
        qualities: Arc<Mutex<Vec<u8>>>,
    }

    impl FakeExecutor {
        fn scripted(outcomes: impl IntoIterator<Item = FakeOutcome>) -> Self {
            Self {
                script: Arc::new(Mutex::new(outcomes.into_iter().collect())),
                qualities: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl TranscodeExecutor for FakeExecutor {
        async fn execute(
            &self,
            _input: &Path,
            output: &Path,
            _spec: &FilterSpec,
            quality: u8,
            mut cancel: watch::Receiver<bool>,
            on_stats: StatsCallback,
        ) -> MediaResult<u64> {
            let outcome = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("executor invoked more times than scripted");
            self.qualities.lock().unwrap().push(quality);

            match outcome {
                FakeOutcome::Bytes(bytes) => {
                    tokio::fs::write(output, vec![0u8; bytes as usize]).await?;
                    Ok(bytes)
                }
                FakeOutcome::Stats { out_time_ms, bytes } => {
                    on_stats(FfmpegProgress {
                        out_time_ms,
                        ..Default::default()
                    });
                    tokio::fs::write(output, vec![0u8; bytes as usize]).await?;
                    Ok(bytes)
                }
                FakeOutcome::Fail(message) => {
                    Err(MediaError::ffmpeg_failed(message, None, Some(1)))
                }
                FakeOutcome::BlockUntilCancel => {
                    while !*cancel.borrow() {
                        if cancel.changed().await.is_err() {
                            break;
                        }
                    }
                    Err(MediaError::Cancelled)
                }
            }
        }
    }

    fn source(duration_ms: u64) -> MediaInfo {
        MediaInfo {
            width: 1920,
            height: 1080,
            duration_ms,
            bitrate: 4_000_000,
            rotation: 0,
            mime_type: "video/mp4".to_string(),
            frame_count: 0,
        }
    }

    async fn drain(conversion: &mut Conversion) -> Vec<ConversionProgress> {
        let mut events = Vec::new();
        while let Some(event) = conversion.events.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_first_fit_wins() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.webp");
        let config = ConversionConfig::default()
            .with_quality_ladder(70, 50, 5)
            .with_target_size(1_000_000);

        let fake = FakeExecutor::scripted([
            FakeOutcome::Bytes(2_000_000),
            FakeOutcome::Bytes(1_500_000),
            FakeOutcome::Bytes(900_000),
        ]);
        let converter = Converter::with_executor(fake.clone());
        let mut conversion = converter
            .convert(config, dir.path().join("in.mp4"), &output, source(10_000))
            .unwrap();

        let events = drain(&mut conversion).await;
        assert_eq!(
            events,
            vec![
                ConversionProgress::attempt(70, 1),
                ConversionProgress::size_exceeded(70, 2_000_000),
                ConversionProgress::attempt(65, 2),
                ConversionProgress::size_exceeded(65, 1_500_000),
                ConversionProgress::attempt(60, 3),
                ConversionProgress::complete(60, 900_000),
            ]
        );

        // The fitting attempt stops the ladder even though lower rungs
        // remain
        assert_eq!(*fake.qualities.lock().unwrap(), vec![70, 65, 60]);
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 900_000);
    }

    #[tokio::test]
    async fn test_exhaustion_promotes_best_oversize() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.webp");
        let config = ConversionConfig::default()
            .with_quality_ladder(70, 50, 5)
            .with_target_size(1_000_000);

        let fake = FakeExecutor::scripted([
            FakeOutcome::Bytes(2_000_000),
            FakeOutcome::Bytes(1_900_000),
            FakeOutcome::Bytes(1_800_000),
            FakeOutcome::Bytes(1_700_000),
            FakeOutcome::Bytes(1_550_000),
        ]);
        let converter = Converter::with_executor(fake.clone());
        let mut conversion = converter
            .convert(config, dir.path().join("in.mp4"), &output, source(10_000))
            .unwrap();

        let events = drain(&mut conversion).await;
        assert_eq!(events.len(), 11);
        assert_eq!(
            events.last().unwrap(),
            &ConversionProgress::completed_oversize(50, 1_550_000, 1_000_000)
        );
        // Every oversize attempt reported itself, including the last one
        let exceeded = events
            .iter()
            .filter(|e| e.event_type() == ConversionEventType::SizeExceeded)
            .count();
        assert_eq!(exceeded, 5);

        assert_eq!(*fake.qualities.lock().unwrap(), vec![70, 65, 60, 55, 50]);
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 1_550_000);
    }

    #[tokio::test]
    async fn test_failure_without_best_fails() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.webp");

        let fake = FakeExecutor::scripted([FakeOutcome::Fail("filter graph rejected")]);
        let converter = Converter::with_executor(fake);
        let mut conversion = converter
            .convert(
                ConversionConfig::default(),
                dir.path().join("in.mp4"),
                &output,
                source(10_000),
            )
            .unwrap();

        let events = drain(&mut conversion).await;
        assert_eq!(events[0], ConversionProgress::attempt(90, 1));
        match events.last().unwrap() {
            ConversionProgress::Failed { reason } => {
                assert!(reason.contains("filter graph rejected"))
            }
            other => panic!("expected failed event, got {other:?}"),
        }
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_failure_after_oversize_promotes_best() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.webp");
        let config = ConversionConfig::default().with_target_size(1_000_000);

        let fake = FakeExecutor::scripted([
            FakeOutcome::Bytes(1_500_000),
            FakeOutcome::Fail("encoder crashed"),
        ]);
        let converter = Converter::with_executor(fake);
        let mut conversion = converter
            .convert(config, dir.path().join("in.mp4"), &output, source(10_000))
            .unwrap();

        let events = drain(&mut conversion).await;
        assert_eq!(
            events.last().unwrap(),
            &ConversionProgress::completed_oversize(90, 1_500_000, 1_000_000)
        );
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 1_500_000);
    }

    #[tokio::test]
    async fn test_attempt_count_is_bounded_by_ladder() {
        let dir = TempDir::new().unwrap();
        let config = ConversionConfig::default()
            .with_quality_ladder(90, 40, 5)
            .with_target_size(1);
        let rungs = config.max_attempts() as usize;
        assert_eq!(rungs, 11);

        let fake = FakeExecutor::scripted(vec![FakeOutcome::Bytes(2_000_000); rungs]);
        let converter = Converter::with_executor(fake.clone());
        let mut conversion = converter
            .convert(
                config,
                dir.path().join("in.mp4"),
                dir.path().join("out.webp"),
                source(10_000),
            )
            .unwrap();

        let events = drain(&mut conversion).await;
        let attempts = events
            .iter()
            .filter(|e| e.event_type() == ConversionEventType::Attempt)
            .count();
        assert_eq!(attempts, rungs);
        assert_eq!(
            *fake.qualities.lock().unwrap(),
            (0..11u8).map(|i| 90 - 5 * i).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream_without_terminal_event() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.webp");

        let fake = FakeExecutor::scripted([FakeOutcome::BlockUntilCancel]);
        let converter = Converter::with_executor(fake);
        let mut conversion = converter
            .convert(
                ConversionConfig::default(),
                dir.path().join("in.mp4"),
                &output,
                source(10_000),
            )
            .unwrap();

        let first = conversion.events.recv().await.unwrap();
        assert_eq!(first, ConversionProgress::attempt(90, 1));

        conversion.handle.cancel();
        let rest = drain(&mut conversion).await;
        assert!(rest.is_empty(), "no events after cancellation, got {rest:?}");
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_progress_reports_fraction_of_kept_duration() {
        let dir = TempDir::new().unwrap();
        let config = ConversionConfig::default().with_target_size(1_000_000);

        let fake = FakeExecutor::scripted([FakeOutcome::Stats {
            out_time_ms: 5_000,
            bytes: 900_000,
        }]);
        let converter = Converter::with_executor(fake);
        let mut conversion = converter
            .convert(
                config,
                dir.path().join("in.mp4"),
                dir.path().join("out.webp"),
                source(10_000),
            )
            .unwrap();

        let events = drain(&mut conversion).await;
        let progress = events
            .iter()
            .find_map(|e| match e {
                ConversionProgress::Progress {
                    fraction,
                    quality,
                    attempt_number,
                    ..
                } => Some((*fraction, *quality, *attempt_number)),
                _ => None,
            })
            .expect("progress event missing");
        assert!((progress.0 - 0.5).abs() < 1e-9);
        assert_eq!(progress.1, 90);
        assert_eq!(progress.2, 1);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_progress_fraction_zero_when_duration_unknown() {
        let dir = TempDir::new().unwrap();

        let fake = FakeExecutor::scripted([FakeOutcome::Stats {
            out_time_ms: 5_000,
            bytes: 1_000,
        }]);
        let converter = Converter::with_executor(fake);
        let mut conversion = converter
            .convert(
                ConversionConfig::default(),
                dir.path().join("in.mp4"),
                dir.path().join("out.webp"),
                source(0),
            )
            .unwrap();

        let events = drain(&mut conversion).await;
        let fraction = events
            .iter()
            .find_map(|e| match e {
                ConversionProgress::Progress { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .expect("progress event missing");
        assert_eq!(fraction, 0.0);
    }

    #[tokio::test]
    async fn test_empty_output_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.webp");

        let fake = FakeExecutor::scripted([FakeOutcome::Bytes(0)]);
        let converter = Converter::with_executor(fake);
        let mut conversion = converter
            .convert(
                ConversionConfig::default(),
                dir.path().join("in.mp4"),
                &output,
                source(10_000),
            )
            .unwrap();

        let events = drain(&mut conversion).await;
        assert_eq!(
            events.last().unwrap().event_type(),
            ConversionEventType::Failed
        );
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_synchronously() {
        let dir = TempDir::new().unwrap();
        let config = ConversionConfig::default().with_quality_ladder(40, 90, 5);

        let converter = Converter::with_executor(FakeExecutor::default());
        let result = converter.convert(
            config,
            dir.path().join("in.mp4"),
            dir.path().join("out.webp"),
            source(10_000),
        );
        assert!(matches!(result, Err(MediaError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_single_rung_ladder_terminates() {
        let dir = TempDir::new().unwrap();
        let config = ConversionConfig::default()
            .with_quality_ladder(70, 70, 5)
            .with_target_size(1);

        let fake = FakeExecutor::scripted([FakeOutcome::Bytes(500_000)]);
        let converter = Converter::with_executor(fake.clone());
        let mut conversion = converter
            .convert(
                config,
                dir.path().join("in.mp4"),
                dir.path().join("out.webp"),
                source(10_000),
            )
            .unwrap();

        let events = drain(&mut conversion).await;
        assert_eq!(*fake.qualities.lock().unwrap(), vec![70]);
        assert_eq!(
            events.last().unwrap(),
            &ConversionProgress::completed_oversize(70, 500_000, 1)
        );
    }
}
