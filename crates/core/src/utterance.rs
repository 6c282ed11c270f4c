//! Transcription result types

use serde::{Deserialize, Serialize};

use crate::ids::StreamId;

/// The textual result of one transcribed audio segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    /// Stream the audio came from
    pub stream_id: StreamId,
    /// Recognized text
    pub text: String,
    /// Detected (or configured) language, BCP-47 style short code
    pub language: String,
    /// Recognizer confidence in [0.0, 1.0]
    pub confidence: f32,
    /// Wall-clock bounds of the underlying segment
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
}

impl Utterance {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Raw recognizer output, before it is tied to a stream
#[derive(Debug, Clone, Default)]
pub struct Transcription {
    pub text: String,
    pub language: String,
    pub confidence: f32,
}
