//! Engine traits
//!
//! STT and TTS engines are modeled as a tagged set of adapters over a small
//! capability interface. New engines are added by adding a variant and an
//! adapter, never by runtime reflection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::{AudioSegment, SampleRate};
use crate::utterance::Transcription;

/// Errors surfaced by engine adapters
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("engine call timed out")]
    Timeout,
}

/// The TTS engines the backend knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Fast CPU engine, low latency, used for staged intros
    Piper,
    /// High-quality engine, used for the main body
    Zonos,
    /// Compact multilingual engine
    Kokoro,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Piper => "piper",
            EngineKind::Zonos => "zonos",
            EngineKind::Kokoro => "kokoro",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "piper" => Some(EngineKind::Piper),
            "zonos" => Some(EngineKind::Zonos),
            "kokoro" => Some(EngineKind::Kokoro),
            _ => None,
        }
    }

    pub fn all() -> [EngineKind; 3] {
        [EngineKind::Piper, EngineKind::Zonos, EngineKind::Kokoro]
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A voice an engine can speak with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceInfo {
    /// Canonical voice id, e.g. "de-thorsten-low"
    pub id: String,
    /// Engine providing this voice
    pub engine: EngineKind,
    /// Language short code
    pub language: String,
}

/// Synthesis tuning carried with every request
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisParams {
    /// Speaking rate, 1.0 = normal
    pub speed: f32,
    /// Output gain, 1.0 = unity
    pub volume: f32,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            speed: 1.0,
            volume: 1.0,
        }
    }
}

/// One synthesis call
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub language: String,
    pub params: SynthesisParams,
}

/// Engine output before post-processing
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: SampleRate,
}

/// Text-to-speech engine adapter
///
/// Adapters are lazily initialized by the registry; `is_available` reflects
/// whether the mandatory assets for this engine were found at startup.
#[async_trait]
pub trait TtsEngine: Send + Sync + 'static {
    fn kind(&self) -> EngineKind;

    /// Load models/assets. Called once, lazily, under the registry lock.
    async fn initialize(&self) -> Result<(), EngineError>;

    /// Synthesize one chunk of text. Runs to completion on a worker; the
    /// returned PCM is at the engine's native sample rate.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio, EngineError>;

    fn list_voices(&self) -> Vec<VoiceInfo>;

    fn is_available(&self) -> bool;

    fn native_sample_rate(&self) -> SampleRate;
}

/// STT model discovery entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttModelInfo {
    pub name: String,
    pub loaded: bool,
}

/// Speech-to-text backend
///
/// `transcribe` converts a finalized segment directly from its in-memory
/// float representation. No temp files, no subprocesses.
#[async_trait]
pub trait SpeechToText: Send + Sync + 'static {
    async fn transcribe(
        &self,
        segment: &AudioSegment,
        language: Option<&str>,
    ) -> Result<Transcription, EngineError>;

    /// Models this backend can serve
    fn available_models(&self) -> Vec<SttModelInfo>;

    /// Whether a GPU device is usable for inference
    fn gpu_available(&self) -> bool;

    fn model_name(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!(EngineKind::parse("piper"), Some(EngineKind::Piper));
        assert_eq!(EngineKind::parse(" Zonos "), Some(EngineKind::Zonos));
        assert_eq!(EngineKind::parse("auto"), None);
        assert_eq!(EngineKind::Kokoro.as_str(), "kokoro");
    }

    #[test]
    fn test_engine_kind_serde() {
        let json = serde_json::to_string(&EngineKind::Piper).unwrap();
        assert_eq!(json, "\"piper\"");
    }
}
