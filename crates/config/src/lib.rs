//! Configuration for the voicehub backend
//!
//! Settings are resolved in priority order: environment variables >
//! `config/{env}.yaml` > `config/default.yaml` > built-in defaults. The
//! resulting [`Settings`] value is an immutable snapshot for the lifetime of
//! the process; changing configuration requires a restart.

pub mod settings;
pub mod voices;

pub use settings::{
    load_settings, AudioConfig, FeatureFlags, MetricsConfig, ObservabilityConfig, RouterConfig,
    RuntimeEnvironment, ServerConfig, Settings, StagedTtsConfig, SttConfig, TtsConfig,
};
pub use voices::{EngineAvailability, VoiceAsset, VoiceCatalog};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
