//! Media pipeline: probing, filter-graph planning and the size-fitting
//! quality search.
//!
//! The crate shells out to ffmpeg/ffprobe for all decoding and encoding;
//! everything in front of that boundary (segment handling, filter
//! planning, the quality ladder) is pure and unit-tested. Entry points:
//!
//! - [`probe_media`] / [`MediaProbe`]: inspect a source file
//! - [`filtergraph::build`]: plan the encode for a configuration
//! - [`Converter::convert`]: run the quality search, streaming events

pub mod command;
pub mod error;
pub mod filtergraph;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod search;
pub mod transcode;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use filtergraph::{EncoderOptions, FilterSpec, FilterStage, RenderedFilter};
pub use probe::{probe_media, FfprobeProber, MediaProbe};
pub use progress::{FfmpegProgress, StatsCallback};
pub use search::{Conversion, ConversionHandle, Converter, ProgressStream};
pub use transcode::{FfmpegTranscoder, TranscodeExecutor};
