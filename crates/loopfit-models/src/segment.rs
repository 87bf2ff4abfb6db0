//! Kept time ranges and their canonicalization.
//!
//! Callers edit keep-ranges freely (reordering, overlapping, splitting), so
//! before a range list reaches the filter-graph builder it is normalized with
//! [`merge_segments`]: sorted by start time, with overlapping or exactly
//! adjacent ranges folded into one.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A half-open kept time range in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct TrimSegment {
    /// Start of the kept range in milliseconds.
    pub start_ms: u64,
    /// End of the kept range in milliseconds.
    pub end_ms: u64,
}

impl TrimSegment {
    /// Create a new segment.
    pub const fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Duration of this segment in milliseconds (0 for degenerate segments).
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Duration of this segment in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.duration_ms() as f64 / 1000.0
    }

    /// Whether this segment covers no time at all (`start_ms == end_ms`).
    pub fn is_empty(&self) -> bool {
        self.end_ms <= self.start_ms
    }
}

/// Normalize a keep-range list into canonical form.
///
/// The result is sorted ascending by `start_ms` and pairwise non-overlapping;
/// overlapping or exactly adjacent input ranges are folded into one range
/// covering their union. The total kept time is preserved exactly. Running
/// the function on its own output is a no-op.
///
/// Lists of zero or one segments are returned unchanged. Zero-duration
/// segments pass through untouched; discarding them is the consumer's call.
pub fn merge_segments(segments: &[TrimSegment]) -> Vec<TrimSegment> {
    if segments.len() <= 1 {
        return segments.to_vec();
    }

    let mut sorted = segments.to_vec();
    sorted.sort_by_key(|s| s.start_ms);

    let mut merged: Vec<TrimSegment> = Vec::with_capacity(sorted.len());
    for next in sorted {
        match merged.last_mut() {
            Some(last) if next.start_ms <= last.end_ms => {
                last.end_ms = last.end_ms.max(next.end_ms);
            }
            _ => merged.push(next),
        }
    }

    merged
}

/// Total kept time across a segment list in milliseconds.
///
/// Callers should pass an already-merged list; overlapping ranges would be
/// counted twice here.
pub fn total_kept_ms(segments: &[TrimSegment]) -> u64 {
    segments.iter().map(|s| s.duration_ms()).sum()
}
