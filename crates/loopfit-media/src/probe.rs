//! FFprobe media inspection.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use loopfit_models::MediaInfo;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Source inspection boundary.
///
/// A conversion needs the source dimensions and duration before the first
/// encode attempt; callers probe first and hand the result in. Production
/// code uses [`FfprobeProber`]; tests substitute fixed values.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Inspect a media file.
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo>;
}

/// [`MediaProbe`] backed by the ffprobe binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfprobeProber;

#[async_trait]
impl MediaProbe for FfprobeProber {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        probe_media(path).await
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
    tags: Option<FfprobeStreamTags>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStreamTags {
    rotate: Option<String>,
}

/// Probe a media file for the information a conversion needs.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffprobe_failed(
            "FFprobe exited with non-zero status",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    media_info_from_probe(&probe)
}

/// Reduce raw ffprobe output to a [`MediaInfo`].
fn media_info_from_probe(probe: &FfprobeOutput) -> MediaResult<MediaInfo> {
    // Find video stream
    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("no video stream found".to_string()))?;

    let duration_secs = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    let duration_ms = (duration_secs * 1000.0).round().max(0.0) as u64;

    let bitrate = probe
        .format
        .bit_rate
        .as_deref()
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    // avg_frame_rate is "0/0" for some containers; fall through to
    // r_frame_rate in that case.
    let fps = [video.avg_frame_rate.as_deref(), video.r_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .find_map(parse_frame_rate)
        .unwrap_or(0.0);

    let frame_count = video
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or_else(|| (duration_secs * fps).round().max(0.0) as u64);

    let mime_type = probe
        .format
        .format_name
        .as_deref()
        .map(mime_from_format)
        .unwrap_or("application/octet-stream")
        .to_string();

    Ok(MediaInfo {
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        duration_ms,
        bitrate,
        rotation: stream_rotation(video),
        mime_type,
        frame_count,
    })
}

/// Display rotation in degrees, normalized to 0..360.
///
/// The display-matrix side data is authoritative and usually negative
/// (-90 means rotate clockwise to display); the legacy rotate tag is the
/// fallback for older muxers.
fn stream_rotation(stream: &FfprobeStream) -> u32 {
    let raw = stream
        .side_data_list
        .iter()
        .find_map(|sd| sd.rotation)
        .or_else(|| {
            stream
                .tags
                .as_ref()
                .and_then(|t| t.rotate.as_deref())
                .and_then(|r| r.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    (raw.round() as i64).rem_euclid(360) as u32
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if num > 0.0 && den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|fps| *fps > 0.0)
}

/// Map ffprobe's comma-separated demuxer list to a MIME type.
fn mime_from_format(format_name: &str) -> &'static str {
    match format_name.split(',').next().unwrap_or(format_name) {
        "mov" | "mp4" | "m4a" | "3gp" | "3g2" | "mj2" => "video/mp4",
        "matroska" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mpegts" => "video/mp2t",
        "flv" => "video/x-flv",
        "gif" => "image/gif",
        "webp" | "webp_pipe" => "image/webp",
        _ => "application/octet-stream",
    }
}
