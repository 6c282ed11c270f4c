//! Audio pipeline: ingest, VAD, STT adapter, and post-processing
//!
//! Ingress frames flow through a per-stream bounded queue into an ingest
//! worker that applies sequencing, VAD, and duration bounds, then hands the
//! finalized segment to the STT adapter's worker pool.

pub mod ingest;
pub mod post;
pub mod stt;
pub mod vad;

pub use ingest::{IngestEvent, IngestStats, PushOutcome, StreamEndReason, StreamIngest};
pub use post::AudioPost;
pub use stt::{SttAdapter, StubStt};
pub use vad::{VadDecision, VadDetector, VadOptions};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("stream error: {0}")]
    Stream(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("operation timed out")]
    Timeout,

    #[error("channel closed")]
    ChannelClosed,
}

impl From<voicehub_core::EngineError> for PipelineError {
    fn from(err: voicehub_core::EngineError) -> Self {
        match err {
            voicehub_core::EngineError::Timeout => PipelineError::Timeout,
            voicehub_core::EngineError::Model(m) => PipelineError::Model(m),
            other => PipelineError::Stt(other.to_string()),
        }
    }
}
