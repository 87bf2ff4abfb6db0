//! Conversion progress events.
//!
//! The quality search emits these over a single-consumer stream, in
//! emission order; consumers treat the stream as a linear log. Exactly one
//! terminal event ([`ConversionProgress::Complete`],
//! [`ConversionProgress::CompletedOversize`] or
//! [`ConversionProgress::Failed`]) ends a conversion, except when it is
//! cancelled, which ends the stream silently.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one conversion invocation, used for log
/// correlation and scratch naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ConversionId(pub String);

impl ConversionId {
    /// Generate a new random conversion ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of conversion events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConversionEventType {
    /// An encode attempt is starting
    Attempt,
    /// Position update within an attempt
    Progress,
    /// An attempt produced output over the byte budget
    SizeExceeded,
    /// An attempt fit the budget
    Complete,
    /// The ladder exhausted but a best-effort output exists
    CompletedOversize,
    /// No attempt produced usable output
    Failed,
}

impl ConversionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionEventType::Attempt => "attempt",
            ConversionEventType::Progress => "progress",
            ConversionEventType::SizeExceeded => "size_exceeded",
            ConversionEventType::Complete => "complete",
            ConversionEventType::CompletedOversize => "completed_oversize",
            ConversionEventType::Failed => "failed",
        }
    }

    /// Whether this kind ends the conversion.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionEventType::Complete
                | ConversionEventType::CompletedOversize
                | ConversionEventType::Failed
        )
    }
}

/// One immutable snapshot of conversion state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionProgress {
    /// An encode attempt is about to run.
    Attempt { quality: u8, attempt_number: u32 },

    /// Encoder position within the current attempt.
    Progress {
        /// Fraction of the kept duration encoded so far, 0.0-1.0.
        fraction: f64,
        quality: u8,
        attempt_number: u32,
        /// Wall-clock time since the attempt started.
        elapsed_ms: u64,
    },

    /// The attempt finished but its output missed the byte budget; the
    /// search continues at a lower quality.
    SizeExceeded { quality: u8, output_bytes: u64 },

    /// An attempt fit the budget; the search stops at the first fit.
    Complete { quality: u8, output_bytes: u64 },

    /// Every quality produced oversize output; the smallest one is kept.
    CompletedOversize {
        quality: u8,
        output_bytes: u64,
        target_size_bytes: u64,
    },

    /// No attempt produced usable output.
    Failed { reason: String },
}

impl ConversionProgress {
    /// Create an attempt event.
    pub fn attempt(quality: u8, attempt_number: u32) -> Self {
        ConversionProgress::Attempt {
            quality,
            attempt_number,
        }
    }

    /// Create a progress event, clamping the fraction to 0.0-1.0.
    pub fn progress(fraction: f64, quality: u8, attempt_number: u32, elapsed_ms: u64) -> Self {
        ConversionProgress::Progress {
            fraction: fraction.clamp(0.0, 1.0),
            quality,
            attempt_number,
            elapsed_ms,
        }
    }

    /// Create a size-exceeded event.
    pub fn size_exceeded(quality: u8, output_bytes: u64) -> Self {
        ConversionProgress::SizeExceeded {
            quality,
            output_bytes,
        }
    }

    /// Create a completion event.
    pub fn complete(quality: u8, output_bytes: u64) -> Self {
        ConversionProgress::Complete {
            quality,
            output_bytes,
        }
    }

    /// Create a best-effort oversize completion event.
    pub fn completed_oversize(quality: u8, output_bytes: u64, target_size_bytes: u64) -> Self {
        ConversionProgress::CompletedOversize {
            quality,
            output_bytes,
            target_size_bytes,
        }
    }

    /// Create a failure event.
    pub fn failed(reason: impl Into<String>) -> Self {
        ConversionProgress::Failed {
            reason: reason.into(),
        }
    }

    /// Get the event type.
    pub fn event_type(&self) -> ConversionEventType {
        match self {
            ConversionProgress::Attempt { .. } => ConversionEventType::Attempt,
            ConversionProgress::Progress { .. } => ConversionEventType::Progress,
            ConversionProgress::SizeExceeded { .. } => ConversionEventType::SizeExceeded,
            ConversionProgress::Complete { .. } => ConversionEventType::Complete,
            ConversionProgress::CompletedOversize { .. } => ConversionEventType::CompletedOversize,
            ConversionProgress::Failed { .. } => ConversionEventType::Failed,
        }
    }

    /// Whether this event ends the conversion.
    pub fn is_terminal(&self) -> bool {
        self.event_type().is_terminal()
    }
}
