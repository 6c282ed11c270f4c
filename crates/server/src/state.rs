//! Application state
//!
//! Process-wide singletons created at startup and passed explicitly into
//! components: the configuration snapshot, the engine registry, the
//! fingerprint cache, the STT adapter, and the intent router.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use voicehub_config::{Settings, VoiceCatalog};
use voicehub_pipeline::{ingest::IngestStats, AudioPost, SttAdapter};
use voicehub_router::IntentRouter;
use voicehub_tts::{EngineRegistry, FingerprintCache, StagedTts};

use crate::session::SessionManager;
use crate::ServerError;

/// Shared state across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration snapshot; replaced only by a restart
    pub config: Arc<Settings>,
    pub catalog: Arc<VoiceCatalog>,
    pub registry: Arc<EngineRegistry>,
    pub staged: Arc<StagedTts>,
    pub stt: Arc<SttAdapter>,
    pub router: Arc<IntentRouter>,
    pub sessions: Arc<SessionManager>,
    pub ingest_stats: Arc<IngestStats>,
    /// Set once the WebSocket listener accepts connections; health reads it
    pub accepting: Arc<AtomicBool>,
}

impl AppState {
    /// Wire up the full state from a settings snapshot.
    pub fn new(config: Settings) -> Result<Self, ServerError> {
        let catalog = Arc::new(VoiceCatalog::load(std::path::Path::new("config/voices.json")));
        Self::with_catalog(config, catalog)
    }

    pub fn with_catalog(config: Settings, catalog: Arc<VoiceCatalog>) -> Result<Self, ServerError> {
        let availability = catalog.validate();
        let registry = Arc::new(EngineRegistry::new(catalog.clone(), availability));

        let cache = Arc::new(FingerprintCache::new(
            config.staged_tts.cache_capacity,
            config.staged_tts.enable_caching,
        ));
        let staged = Arc::new(StagedTts::new(
            registry.clone(),
            cache,
            AudioPost::from_config(&config.tts),
            config.staged_tts.clone(),
        ));

        let stt = Arc::new(build_stt_adapter(&config));

        let router = Arc::new(
            IntentRouter::new(&config.router)
                .map_err(|e| ServerError::Internal(e.to_string()))?,
        );

        let sessions = Arc::new(SessionManager::new(config.server.max_sessions));

        Ok(Self {
            config: Arc::new(config),
            catalog,
            registry,
            staged,
            stt,
            router,
            sessions,
            ingest_stats: Arc::new(IngestStats::default()),
            accepting: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn mark_accepting(&self) {
        self.accepting.store(true, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }
}

#[cfg(feature = "onnx")]
fn build_stt_adapter(config: &Settings) -> SttAdapter {
    use std::sync::Arc as StdArc;
    use voicehub_core::SpeechToText;
    use voicehub_pipeline::stt::whisper::WhisperStt;

    let device = config.stt.device.clone();
    let model_root = std::path::PathBuf::from("models/stt");

    let load = move |model: &str| -> Result<StdArc<dyn SpeechToText>, voicehub_core::EngineError> {
        WhisperStt::load(model_root.join(model), &device).map(|m| StdArc::new(m) as StdArc<dyn SpeechToText>)
    };

    match load(&config.stt.model) {
        Ok(backend) => SttAdapter::new(&config.stt, backend, Box::new(load)),
        Err(e) => {
            tracing::warn!(error = %e, model = %config.stt.model, "STT model load failed, using stub backend");
            SttAdapter::stub(&config.stt)
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn build_stt_adapter(config: &Settings) -> SttAdapter {
    tracing::info!("ONNX inference disabled, using stub STT backend");
    SttAdapter::stub(&config.stt)
}
