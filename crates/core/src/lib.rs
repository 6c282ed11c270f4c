//! Core types for the voicehub realtime voice backend
//!
//! This crate provides the foundational types shared by all other crates:
//! - Audio frame and segment types (PCM16 on the wire, f32 internally)
//! - The JSON v1 / binary v2 wire protocol
//! - Stable ids for sessions, streams, and TTS sequences
//! - Traits for pluggable STT and TTS engines
//! - The wire-level error taxonomy

pub mod audio;
pub mod ids;
pub mod traits;
pub mod utterance;
pub mod wire;

pub use audio::{AudioFrame, AudioSegment, SampleRate, SegmentBuffer};
pub use ids::{SequenceId, SessionId, StreamId};
pub use traits::{
    EngineError, EngineKind, SpeechToText, SttModelInfo, SynthesisParams, SynthesisRequest,
    SynthesizedAudio, TtsEngine, VoiceInfo,
};
pub use utterance::{Transcription, Utterance};
pub use wire::{
    BinaryAudioFrame, ClientMessage, CloseCode, ErrorKind, Features, FrameError, Hello,
    ServerMessage, TtsEngineInfo,
};
