//! Wire protocol
//!
//! JSON v1 carries all control traffic and all egress. Binary v2 is an
//! opt-in ingress-only framing for microphone audio, negotiated during the
//! handshake. Close codes: 1000 normal, 1011 server error / ping timeout,
//! 4401 unauthorized.

use serde::{Deserialize, Serialize};

use crate::ids::SequenceId;
use crate::traits::EngineKind;

/// WebSocket close codes used by the transport
pub struct CloseCode;

impl CloseCode {
    pub const NORMAL: u16 = 1000;
    pub const SERVER_ERROR: u16 = 1011;
    pub const UNAUTHORIZED: u16 = 4401;
}

/// Feature set negotiated at handshake: pairwise minimum of what the client
/// advertises and what the server allows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub binary_audio: bool,
    #[serde(default)]
    pub interim_transcripts: bool,
    #[serde(default)]
    pub vad: bool,
}

impl Features {
    /// Negotiate against the server-side allowance
    pub fn intersect(&self, server: &Features) -> Features {
        Features {
            binary_audio: self.binary_audio && server.binary_audio,
            interim_transcripts: self.interim_transcripts && server.interim_transcripts,
            vad: self.vad && server.vad,
        }
    }
}

/// Parsed handshake, accepted as `{op:"hello",...}` or legacy `{type:"hello",...}`
#[derive(Debug, Clone, Default)]
pub struct Hello {
    pub version: Option<String>,
    pub device: Option<String>,
    pub capabilities: Features,
}

impl Hello {
    /// Parse a handshake message. Capabilities are accepted either as a
    /// feature object or as a list of feature names (legacy clients).
    pub fn parse(value: &serde_json::Value) -> Option<Hello> {
        let tag = value
            .get("op")
            .or_else(|| value.get("type"))
            .and_then(|v| v.as_str())?;
        if tag != "hello" {
            return None;
        }

        let version = match value.get("version") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let device = value
            .get("device")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let capabilities = match value.get("capabilities") {
            Some(caps @ serde_json::Value::Object(_)) => {
                serde_json::from_value(caps.clone()).unwrap_or_default()
            }
            Some(serde_json::Value::Array(names)) => {
                let has = |name: &str| names.iter().any(|v| v.as_str() == Some(name));
                Features {
                    binary_audio: has("binary_audio"),
                    interim_transcripts: has("interim_transcripts"),
                    vad: has("vad"),
                }
            }
            _ => Features::default(),
        };

        Some(Hello {
            version,
            device,
            capabilities,
        })
    }
}

/// Error kinds surfaced to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    InvalidMessage,
    StreamOverflow,
    SttFailed,
    RoutingFailed,
    TtsEngineUnavailable,
    TtsChunkFailed,
    Backpressure,
    /// Caught panic at the session boundary
    Internal,
}

/// Client → server messages (JSON v1)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Legacy handshake form; `{op:"hello"}` is handled before tagged parsing
    Hello {
        #[serde(default)]
        version: Option<serde_json::Value>,
        #[serde(default)]
        capabilities: Option<serde_json::Value>,
    },
    StartAudioStream {
        stream_id: String,
    },
    /// One base64 PCM16 chunk
    AudioChunk {
        stream_id: String,
        chunk: String,
        sequence: u32,
        timestamp: u64,
    },
    EndAudioStream {
        stream_id: String,
    },
    /// Direct text input, bypasses STT
    Text {
        content: String,
    },
    Ping {
        #[serde(default)]
        timestamp: u64,
    },
    SwitchTtsEngine {
        engine: String,
    },
    SetTtsVoice {
        voice: String,
        #[serde(default)]
        engine: Option<String>,
    },
    SetTtsOptions {
        #[serde(default)]
        speed: Option<f32>,
        #[serde(default)]
        volume: Option<f32>,
        #[serde(default)]
        language: Option<String>,
    },
    SwitchSttModel {
        model: String,
    },
    GetSttModels,
    SetAudioOpts {
        #[serde(default)]
        vad: Option<bool>,
        #[serde(default)]
        noise_suppression: Option<bool>,
        #[serde(default)]
        silence_window_ms: Option<u64>,
    },
    GetLlmModels,
    SwitchLlmModel {
        model: String,
    },
    SetLlmOptions {
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<u32>,
        #[serde(default)]
        context_turns: Option<u32>,
        #[serde(default)]
        system_prompt: Option<String>,
    },
    StagedTtsControl {
        action: String,
        #[serde(default)]
        config: Option<serde_json::Value>,
    },
    GetTtsInfo,
}

/// Per-engine entry in the `tts_info` discovery reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsEngineInfo {
    pub engine: EngineKind,
    pub available: bool,
    pub voices: Vec<String>,
}

/// Server → client messages (JSON v1). The handshake `ready` reply is built
/// by the transport directly (`{op:"ready", features}`), not through this enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AudioStreamStarted {
        stream_id: String,
    },
    AudioStreamEnded {
        stream_id: String,
        reason: String,
    },
    InterimTranscript {
        stream_id: String,
        text: String,
    },
    /// Text reply produced by the intent router
    Response {
        text: String,
    },
    /// One audio chunk of a TTS sequence; `audio` is base64 PCM16 or null on
    /// a failed chunk
    TtsChunk {
        sequence_id: SequenceId,
        index: u32,
        total: u32,
        engine: EngineKind,
        text: String,
        audio: Option<String>,
        sample_rate: u32,
        success: bool,
    },
    TtsSequenceEnd {
        sequence_id: SequenceId,
    },
    Pong {
        timestamp: u64,
    },
    LlmModels {
        models: Vec<String>,
        current: String,
    },
    TtsInfo {
        engines: Vec<TtsEngineInfo>,
        current_engine: String,
        current_voice: String,
    },
    SttModels {
        models: Vec<String>,
        current: String,
    },
    TtsEngineSwitched {
        engine: String,
    },
    TtsVoiceUpdated {
        voice: String,
        engine: String,
    },
    TtsOptionsUpdated {
        speed: f32,
        volume: f32,
        language: String,
    },
    SttModelSwitched {
        model: String,
    },
    AudioOptsUpdated {
        vad: bool,
        noise_suppression: bool,
        silence_window_ms: u64,
    },
    LlmModelSwitched {
        model: String,
    },
    LlmOptionsUpdated,
    StagedTtsUpdated,
    StagedTtsStats {
        stats: serde_json::Value,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl ServerMessage {
    /// Audio chunk delivery is preferred over telemetry under backpressure
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            ServerMessage::TtsChunk { .. } | ServerMessage::TtsSequenceEnd { .. }
        )
    }
}

/// Binary v2 ingress frame:
/// `[u32 LE stream_id_len][stream_id][u32 LE sequence][u64 LE timestamp_ms][PCM16]`
///
/// An empty payload is the end-of-stream sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryAudioFrame {
    pub stream_id: String,
    pub sequence: u32,
    pub timestamp_ms: u64,
    pub payload: Vec<u8>,
}

/// Binary frame decode failure
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    #[error("frame truncated at {0}")]
    Truncated(&'static str),

    #[error("stream id is not valid UTF-8")]
    BadStreamId,

    #[error("stream id length {0} exceeds limit")]
    StreamIdTooLong(u32),
}

/// Upper bound on the stream id field, to reject garbage frames early
const MAX_STREAM_ID_LEN: u32 = 256;

impl BinaryAudioFrame {
    pub fn is_end_sentinel(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut rest = bytes;

        let id_len = take_u32(&mut rest).ok_or(FrameError::Truncated("stream_id_len"))?;
        if id_len > MAX_STREAM_ID_LEN {
            return Err(FrameError::StreamIdTooLong(id_len));
        }
        if rest.len() < id_len as usize {
            return Err(FrameError::Truncated("stream_id"));
        }
        let (id_bytes, tail) = rest.split_at(id_len as usize);
        let stream_id = std::str::from_utf8(id_bytes)
            .map_err(|_| FrameError::BadStreamId)?
            .to_string();
        rest = tail;

        let sequence = take_u32(&mut rest).ok_or(FrameError::Truncated("sequence"))?;
        let timestamp_ms = take_u64(&mut rest).ok_or(FrameError::Truncated("timestamp"))?;

        Ok(Self {
            stream_id,
            sequence,
            timestamp_ms,
            payload: rest.to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let id = self.stream_id.as_bytes();
        let mut out = Vec::with_capacity(16 + id.len() + self.payload.len());
        out.extend_from_slice(&(id.len() as u32).to_le_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

fn take_u32(rest: &mut &[u8]) -> Option<u32> {
    if rest.len() < 4 {
        return None;
    }
    let (head, tail) = rest.split_at(4);
    *rest = tail;
    Some(u32::from_le_bytes([head[0], head[1], head[2], head[3]]))
}

fn take_u64(rest: &mut &[u8]) -> Option<u64> {
    if rest.len() < 8 {
        return None;
    }
    let (head, tail) = rest.split_at(8);
    *rest = tail;
    Some(u64::from_le_bytes([
        head[0], head[1], head[2], head[3], head[4], head[5], head[6], head[7],
    ]))
}
