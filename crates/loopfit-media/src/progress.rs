//! FFmpeg progress statistics.

use serde::{Deserialize, Serialize};

/// Statistics parsed from one `-progress pipe:2` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Frames encoded so far
    pub frame: u64,
    /// Current encoding rate in frames per second
    pub fps: f64,
    /// Output time position in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed relative to realtime (e.g. 1.5 = 1.5x)
    pub speed: f64,
    /// Whether the encoder reported the final block
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Fraction of the kept duration encoded so far, clamped to 0.0-1.0.
    ///
    /// Returns 0.0 when the total duration is unknown; a stitched output's
    /// duration comes from the kept segments, not the source container.
    pub fn fraction(&self, total_duration_ms: u64) -> f64 {
        if total_duration_ms == 0 {
            return 0.0;
        }
        (self.out_time_ms.max(0) as f64 / total_duration_ms as f64).clamp(0.0, 1.0)
    }

    /// Estimated seconds until this attempt finishes, if the encoder has
    /// reported a usable speed.
    pub fn eta_seconds(&self, total_duration_ms: u64) -> Option<f64> {
        if self.speed <= 0.0 || self.out_time_ms <= 0 {
            return None;
        }

        let remaining_ms = total_duration_ms as i64 - self.out_time_ms;
        if remaining_ms <= 0 {
            return Some(0.0);
        }

        Some((remaining_ms as f64 / 1000.0) / self.speed)
    }
}

/// Callback type for per-attempt statistics updates.
pub type StatsCallback = Box<dyn Fn(FfmpegProgress) + Send + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };

        assert!((progress.fraction(10_000) - 0.5).abs() < 1e-9);
        assert!((progress.fraction(5000) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fraction_clamps_overshoot() {
        // The encoder can report a position past the kept duration when
        // seeks land on an earlier keyframe.
        let progress = FfmpegProgress {
            out_time_ms: 12_000,
            ..Default::default()
        };
        assert!((progress.fraction(10_000) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fraction_unknown_duration_is_zero() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };
        assert_eq!(progress.fraction(0), 0.0);
    }

    #[test]
    fn test_fraction_negative_position_is_zero() {
        let progress = FfmpegProgress {
            out_time_ms: -42,
            ..Default::default()
        };
        assert_eq!(progress.fraction(10_000), 0.0);
    }

    #[test]
    fn test_eta() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            speed: 2.0,
            ..Default::default()
        };

        // 5 seconds remaining at 2x speed
        let eta = progress.eta_seconds(10_000).unwrap();
        assert!((eta - 2.5).abs() < 0.01);

        assert!(FfmpegProgress::default().eta_seconds(10_000).is_none());
    }
}
