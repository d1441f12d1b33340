//! Error taxonomy for the session controller.
//!
//! Stage-local failures and framing problems are represented as typed
//! variants so the controller can route them without string matching.
//! Adapter errors (recognizer/rewriter/synthesizer) are boxed as
//! `anyhow::Error` since their internals are out of scope; the controller
//! only needs to log and classify them as `*_failed`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoxError {
    #[error("framing error: discarded {discarded} byte(s) resynchronizing")]
    FramingError { discarded: usize },

    #[error("buffer pressure: rolling buffer grew past capacity by {overrun} sample(s)")]
    BufferPressure { overrun: usize },

    #[error("segment rejected: {reason}")]
    SegmentRejected { reason: String },

    #[error("recognizer failed: {0}")]
    RecognizerFailed(#[source] anyhow::Error),

    #[error("recognizer timed out after {elapsed_ms}ms")]
    RecognizerTimedOut { elapsed_ms: u64 },

    #[error("rewriter failed: {0}")]
    RewriterFailed(#[source] anyhow::Error),

    #[error("rewriter timed out after {elapsed_ms}ms")]
    RewriterTimedOut { elapsed_ms: u64 },

    #[error("synthesis first chunk timed out after {elapsed_ms}ms")]
    SynthesisFirstChunkTimedOut { elapsed_ms: u64 },

    #[error("synthesis interrupted: {0}")]
    SynthesisInterrupted(#[source] anyhow::Error),

    #[error("playback timed out after {elapsed_ms}ms")]
    PlaybackTimedOut { elapsed_ms: u64 },

    #[error("device acknowledgement missing: {0}")]
    DeviceAckMissing(String),

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial write failed: {0}")]
    WriteFailed(#[source] anyhow::Error),

    #[error("resource invariant violated: {0}")]
    ResourceInvariantViolated(String),
}

impl VoxError {
    /// The stable error-kind tag used in telemetry records, matching the
    /// taxonomy names in the core contract.
    pub fn kind(&self) -> &'static str {
        match self {
            VoxError::FramingError { .. } => "framing_error",
            VoxError::BufferPressure { .. } => "buffer_pressure",
            VoxError::SegmentRejected { .. } => "segment_rejected",
            VoxError::RecognizerFailed(_) => "recognizer_failed",
            VoxError::RecognizerTimedOut { .. } => "recognizer_timed_out",
            VoxError::RewriterFailed(_) => "rewriter_failed",
            VoxError::RewriterTimedOut { .. } => "rewriter_timed_out",
            VoxError::SynthesisFirstChunkTimedOut { .. } => "synthesis_first_chunk_timed_out",
            VoxError::SynthesisInterrupted(_) => "synthesis_interrupted",
            VoxError::PlaybackTimedOut { .. } => "playback_timed_out",
            VoxError::DeviceAckMissing(_) => "device_ack_missing",
            VoxError::Io(_) => "io_error",
            VoxError::WriteFailed(_) => "io_error",
            VoxError::ResourceInvariantViolated(_) => "resource_invariant_violated",
        }
    }

    /// Abort the process for a programming-error fault, flushing the log
    /// record first. Never returned to a caller.
    pub fn abort_on_invariant_violation(msg: impl Into<String>) -> ! {
        let msg = msg.into();
        tracing::error!(cause = %msg, "resource invariant violated, aborting");
        std::process::abort()
    }
}

pub type Result<T> = std::result::Result<T, VoxError>;
