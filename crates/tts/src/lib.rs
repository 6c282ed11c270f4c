//! Staged two-engine text-to-speech
//!
//! A fast engine synthesizes a short intro while a higher-quality engine
//! works on the main body; chunks are delivered to the client strictly in
//! index order so playback can crossfade them back to back. Synthesized
//! audio is deduplicated through a bounded fingerprint cache that allows at
//! most one in-flight synthesis per fingerprint.

pub mod cache;
pub mod engines;
pub mod registry;
pub mod staged;
pub mod text;

pub use cache::{CacheStats, Fingerprint, FingerprintCache};
pub use registry::EngineRegistry;
pub use staged::{
    ChunkEvent, SequenceCancel, SequenceHandle, SpeakRequest, StagedStats, StagedTts,
    TtsSequenceEvent,
};
pub use text::{chunk_body, sanitize, split_intro, truncate_at_sentence, ChunkPlan};

use thiserror::Error;

/// TTS subsystem errors
#[derive(Error, Debug)]
pub enum TtsError {
    #[error("no TTS engine available for voice '{0}'")]
    NoEngineAvailable(String),

    #[error("engine error: {0}")]
    Engine(#[from] voicehub_core::EngineError),

    #[error("chunk {index} failed: {message}")]
    ChunkFailed { index: u32, message: String },

    #[error("sequence cancelled")]
    Cancelled,

    #[error("synthesis timed out")]
    Timeout,
}
