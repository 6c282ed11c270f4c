//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// WebSocket server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Metrics/health HTTP server configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Audio ingest configuration
    #[serde(default)]
    pub audio: AudioConfig,

    /// STT adapter configuration
    #[serde(default)]
    pub stt: SttConfig,

    /// TTS output configuration
    #[serde(default)]
    pub tts: TtsConfig,

    /// Staged two-engine TTS configuration
    #[serde(default)]
    pub staged_tts: StagedTtsConfig,

    /// Intent router configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Server-side feature allowances for handshake negotiation
    #[serde(default)]
    pub features: FeatureFlags,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings. Hard errors only in staging/production; development
    /// logs warnings and continues.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".into(),
                message: "port cannot be 0".into(),
            });
        }
        if self.server.port == self.metrics.port {
            return Err(ConfigError::InvalidValue {
                field: "metrics.port".into(),
                message: "metrics port must differ from the WebSocket port".into(),
            });
        }
        if self.audio.max_stream_duration_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.max_stream_duration_secs".into(),
                message: "stream duration bound must be at least 1 second".into(),
            });
        }
        if self.staged_tts.min_chunk_chars > self.staged_tts.max_chunk_chars {
            return Err(ConfigError::InvalidValue {
                field: "staged_tts.min_chunk_chars".into(),
                message: format!(
                    "must not exceed max_chunk_chars ({})",
                    self.staged_tts.max_chunk_chars
                ),
            });
        }
        if self.staged_tts.max_chunks == 0 {
            return Err(ConfigError::InvalidValue {
                field: "staged_tts.max_chunks".into(),
                message: "at least one chunk is required".into(),
            });
        }
        if self.router.retry_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "router.retry_limit".into(),
                message: "retry limit must be at least 1".into(),
            });
        }

        if self.environment.is_strict()
            && self.server.token.is_none()
            && self.server.jwt_secret.is_none()
            && self.server.jwt_public_key.is_none()
        {
            return Err(ConfigError::InvalidValue {
                field: "server".into(),
                message: "production requires WS_TOKEN, JWT_SECRET, or JWT_PUBLIC_KEY".into(),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder()
        .add_source(File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env)).required(false));
    }

    let settings = builder
        .add_source(Environment::with_prefix("VOICEHUB").separator("__"))
        .build()?
        .try_deserialize::<Settings>()?;

    Ok(settings)
}

/// WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_ws_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_ws_port")]
    pub port: u16,

    /// Shared-secret auth token; `None` disables token auth
    #[serde(default = "default_ws_token")]
    pub token: Option<String>,

    /// HS256 JWT secret
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: Option<String>,

    /// RS256 JWT public key (PEM)
    #[serde(default = "default_jwt_public_key")]
    pub jwt_public_key: Option<String>,

    /// Remote-IP allow-list; empty means no restriction
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<String>,

    /// Maximum concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Liveness ping interval in seconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Bound of the per-session outbound message queue
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

fn default_ws_host() -> String {
    std::env::var("WS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}
fn default_ws_port() -> u16 {
    env_parse("WS_PORT", 48231)
}
fn default_ws_token() -> Option<String> {
    std::env::var("WS_TOKEN").ok().filter(|t| !t.is_empty())
}
fn default_jwt_secret() -> Option<String> {
    std::env::var("JWT_SECRET").ok().filter(|t| !t.is_empty())
}
fn default_jwt_public_key() -> Option<String> {
    std::env::var("JWT_PUBLIC_KEY").ok().filter(|t| !t.is_empty())
}
fn default_allowed_ips() -> Vec<String> {
    std::env::var("ALLOWED_IPS")
        .map(|s| {
            s.split(',')
                .map(|ip| ip.trim().to_string())
                .filter(|ip| !ip.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
fn default_max_sessions() -> usize {
    100
}
fn default_ping_interval() -> u64 {
    20
}
fn default_outbound_queue() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_ws_host(),
            port: default_ws_port(),
            token: default_ws_token(),
            jwt_secret: default_jwt_secret(),
            jwt_public_key: default_jwt_public_key(),
            allowed_ips: default_allowed_ips(),
            max_sessions: default_max_sessions(),
            ping_interval_secs: default_ping_interval(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

/// Metrics/health HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_host")]
    pub host: String,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    env_parse("METRICS_PORT", 48232)
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

/// Audio ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Hard bound on accumulated stream duration
    #[serde(default = "default_max_stream_duration")]
    pub max_stream_duration_secs: u64,

    /// Bound of the per-stream inbound frame queue (drop-oldest on overflow)
    #[serde(default = "default_inbound_queue")]
    pub inbound_queue: usize,

    /// Enable server-side VAD auto-finalization
    #[serde(default = "default_true")]
    pub vad_enabled: bool,

    /// RMS threshold below which a frame counts as silence (dBFS)
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold_dbfs: f32,

    /// Silence window that finalizes a stream (ms)
    #[serde(default = "default_vad_silence_window")]
    pub vad_silence_window_ms: u64,

    /// Noise gate: frames below this energy never count as voiced (dBFS)
    #[serde(default = "default_noise_gate")]
    pub noise_gate_dbfs: f32,
}

fn default_max_stream_duration() -> u64 {
    30
}
fn default_inbound_queue() -> usize {
    100
}
fn default_vad_threshold() -> f32 {
    -40.0
}
fn default_vad_silence_window() -> u64 {
    1500
}
fn default_noise_gate() -> f32 {
    -55.0
}
fn default_true() -> bool {
    true
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            max_stream_duration_secs: default_max_stream_duration(),
            inbound_queue: default_inbound_queue(),
            vad_enabled: default_true(),
            vad_threshold_dbfs: default_vad_threshold(),
            vad_silence_window_ms: default_vad_silence_window(),
            noise_gate_dbfs: default_noise_gate(),
        }
    }
}

/// STT adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Model identifier
    #[serde(default = "default_stt_model")]
    pub model: String,

    /// Inference device ("cpu" or "cuda")
    #[serde(default = "default_stt_device")]
    pub device: String,

    /// Worker pool concurrency
    #[serde(default = "default_stt_workers")]
    pub workers: usize,

    /// Default language hint
    #[serde(default = "default_language")]
    pub language: String,

    /// Per-transcription deadline in seconds
    #[serde(default = "default_stt_timeout")]
    pub timeout_secs: u64,
}

fn default_stt_model() -> String {
    std::env::var("STT_MODEL").unwrap_or_else(|_| "base".to_string())
}
fn default_stt_device() -> String {
    std::env::var("STT_DEVICE").unwrap_or_else(|_| "cpu".to_string())
}
fn default_stt_workers() -> usize {
    2
}
fn default_language() -> String {
    "de".to_string()
}
fn default_stt_timeout() -> u64 {
    20
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: default_stt_model(),
            device: default_stt_device(),
            workers: default_stt_workers(),
            language: default_language(),
            timeout_secs: default_stt_timeout(),
        }
    }
}

/// TTS output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Default engine name ("piper", "zonos", "kokoro", or "auto")
    #[serde(default = "default_tts_engine")]
    pub engine: String,

    /// Default canonical voice id
    #[serde(default = "default_tts_voice")]
    pub voice: String,

    /// Egress sample rate for synthesized audio
    #[serde(default = "default_tts_target_sr")]
    pub target_sample_rate: u32,

    /// Loudness-normalize synthesized chunks to ~ -16 dBFS
    #[serde(default = "default_loudness_normalize")]
    pub loudness_normalize: bool,

    /// Soft limiter ceiling in dBFS
    #[serde(default = "default_limiter_ceiling")]
    pub limiter_ceiling_dbfs: f32,
}

fn default_tts_engine() -> String {
    std::env::var("TTS_ENGINE").unwrap_or_else(|_| "auto".to_string())
}
fn default_tts_voice() -> String {
    std::env::var("TTS_VOICE").unwrap_or_else(|_| "de-thorsten-low".to_string())
}
fn default_tts_target_sr() -> u32 {
    env_parse("TTS_TARGET_SR", 24000)
}
fn default_loudness_normalize() -> bool {
    env_parse_bool("TTS_LOUDNESS_NORMALIZE", true)
}
fn default_limiter_ceiling() -> f32 {
    env_parse("TTS_LIMITER_CEILING_DBFS", -1.0)
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: default_tts_engine(),
            voice: default_tts_voice(),
            target_sample_rate: default_tts_target_sr(),
            loudness_normalize: default_loudness_normalize(),
            limiter_ceiling_dbfs: default_limiter_ceiling(),
        }
    }
}

/// Staged two-engine TTS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedTtsConfig {
    #[serde(default = "default_staged_enabled")]
    pub enabled: bool,

    /// Body bound in characters, truncated at a sentence boundary
    #[serde(default = "default_max_response_length")]
    pub max_response_length: usize,

    /// Intro bound in characters, truncated at a word boundary
    #[serde(default = "default_max_intro_length")]
    pub max_intro_length: usize,

    /// Per-chunk synthesis deadline in seconds
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,

    /// Maximum main-body chunks
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,

    /// Upper bound when chunked output is forced
    #[serde(default = "default_max_chunks_forced")]
    pub max_chunks_forced: usize,

    /// Client-side crossfade hint in milliseconds
    #[serde(default = "default_crossfade_ms")]
    pub crossfade_ms: u64,

    /// Intro engine name or "auto"
    #[serde(default = "default_intro_engine")]
    pub intro_engine: String,

    /// Main engine name or "auto"
    #[serde(default = "default_main_engine")]
    pub main_engine: String,

    /// Fingerprint caching of synthesized chunks
    #[serde(default = "default_enable_caching")]
    pub enable_caching: bool,

    /// LRU capacity of the fingerprint cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Chunk sizing bounds in characters
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,

    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

fn default_staged_enabled() -> bool {
    env_parse_bool("STAGED_TTS_ENABLED", true)
}
fn default_max_response_length() -> usize {
    env_parse("STAGED_TTS_MAX_RESPONSE_LENGTH", 500)
}
fn default_max_intro_length() -> usize {
    env_parse("STAGED_TTS_MAX_INTRO_LENGTH", 120)
}
fn default_chunk_timeout() -> u64 {
    env_parse("STAGED_TTS_CHUNK_TIMEOUT", 10)
}
fn default_max_chunks() -> usize {
    env_parse("STAGED_TTS_MAX_CHUNKS", 3)
}
fn default_max_chunks_forced() -> usize {
    6
}
fn default_crossfade_ms() -> u64 {
    env_parse("STAGED_TTS_CROSSFADE_MS", 80)
}
fn default_intro_engine() -> String {
    std::env::var("STAGED_TTS_INTRO_ENGINE").unwrap_or_else(|_| "auto".to_string())
}
fn default_main_engine() -> String {
    std::env::var("STAGED_TTS_MAIN_ENGINE").unwrap_or_else(|_| "auto".to_string())
}
fn default_enable_caching() -> bool {
    env_parse_bool("STAGED_TTS_ENABLE_CACHING", true)
}
fn default_cache_capacity() -> usize {
    256
}
fn default_min_chunk_chars() -> usize {
    100
}
fn default_max_chunk_chars() -> usize {
    220
}

impl Default for StagedTtsConfig {
    fn default() -> Self {
        Self {
            enabled: default_staged_enabled(),
            max_response_length: default_max_response_length(),
            max_intro_length: default_max_intro_length(),
            chunk_timeout_secs: default_chunk_timeout(),
            max_chunks: default_max_chunks(),
            max_chunks_forced: default_max_chunks_forced(),
            crossfade_ms: default_crossfade_ms(),
            intro_engine: default_intro_engine(),
            main_engine: default_main_engine(),
            enable_caching: default_enable_caching(),
            cache_capacity: default_cache_capacity(),
            min_chunk_chars: default_min_chunk_chars(),
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

/// Intent router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// External agent endpoint (Flowise-style prediction API)
    #[serde(default = "default_flowise_url")]
    pub flowise_url: Option<String>,

    /// Flow id appended to the agent endpoint
    #[serde(default = "default_flowise_id")]
    pub flowise_id: Option<String>,

    /// Automation webhook endpoint (n8n-style)
    #[serde(default = "default_n8n_url")]
    pub n8n_url: Option<String>,

    /// Token posted to the automation webhook
    #[serde(default)]
    pub n8n_token: Option<String>,

    /// Keywords that route an utterance to the automation webhook
    #[serde(default = "default_webhook_keywords")]
    pub webhook_keywords: Vec<String>,

    /// Skills enabled at startup, consulted in this order
    #[serde(default = "default_enabled_skills")]
    pub enabled_skills: Vec<String>,

    /// Attempts per external call
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Initial backoff in seconds (doubles per attempt, capped at 30 s)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    /// Per-call deadline in seconds
    #[serde(default = "default_router_timeout")]
    pub request_timeout_secs: u64,
}

fn default_flowise_url() -> Option<String> {
    std::env::var("FLOWISE_URL").ok().filter(|s| !s.is_empty())
}
fn default_flowise_id() -> Option<String> {
    std::env::var("FLOWISE_ID").ok().filter(|s| !s.is_empty())
}
fn default_n8n_url() -> Option<String> {
    std::env::var("N8N_URL").ok().filter(|s| !s.is_empty())
}
fn default_webhook_keywords() -> Vec<String> {
    vec!["schalte".to_string(), "steuere".to_string()]
}
fn default_enabled_skills() -> Vec<String> {
    std::env::var("ENABLED_SKILLS")
        .map(|s| {
            s.split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_else(|_| vec!["time".to_string(), "greeting".to_string()])
}
fn default_retry_limit() -> u32 {
    env_parse("RETRY_LIMIT", 3)
}
fn default_retry_backoff() -> u64 {
    env_parse("RETRY_BACKOFF", 1)
}
fn default_router_timeout() -> u64 {
    15
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            flowise_url: default_flowise_url(),
            flowise_id: default_flowise_id(),
            n8n_url: default_n8n_url(),
            n8n_token: None,
            webhook_keywords: default_webhook_keywords(),
            enabled_skills: default_enabled_skills(),
            retry_limit: default_retry_limit(),
            retry_backoff_secs: default_retry_backoff(),
            request_timeout_secs: default_router_timeout(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Server-side feature allowances for handshake negotiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub binary_audio: bool,

    #[serde(default = "default_true")]
    pub interim_transcripts: bool,

    #[serde(default = "default_true")]
    pub vad: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            binary_audio: default_true(),
            interim_transcripts: default_true(),
            vad: default_true(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

fn env_parse_bool(key: &str, fallback: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => fallback,
    }
}
