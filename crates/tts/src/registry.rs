//! Engine registry
//!
//! Engine adapters are created and initialized lazily under a coarse lock;
//! reads after that go through the concurrent map without locking. An engine
//! whose mandatory voice assets were missing at startup stays unavailable
//! and is skipped during plan resolution.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use voicehub_config::{EngineAvailability, VoiceCatalog};
use voicehub_core::{EngineKind, TtsEngine, TtsEngineInfo};

use crate::engines::create_engine;
use crate::TtsError;

pub struct EngineRegistry {
    engines: DashMap<EngineKind, Arc<dyn TtsEngine>>,
    availability: RwLock<EngineAvailability>,
    catalog: Arc<VoiceCatalog>,
    /// Coarse lock serializing lazy engine construction
    init_lock: AsyncMutex<()>,
}

impl EngineRegistry {
    pub fn new(catalog: Arc<VoiceCatalog>, availability: EngineAvailability) -> Self {
        Self {
            engines: DashMap::new(),
            availability: RwLock::new(availability),
            catalog,
            init_lock: AsyncMutex::new(()),
        }
    }

    /// Register a pre-built adapter, marking its engine available. Used for
    /// adapters constructed outside the lazy path.
    pub fn register(&self, engine: Arc<dyn TtsEngine>) {
        let kind = engine.kind();
        self.availability.write().mark(kind, true);
        self.engines.insert(kind, engine);
    }

    pub fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    pub fn is_available(&self, kind: EngineKind) -> bool {
        self.availability.read().is_available(kind)
    }

    pub fn any_available(&self) -> bool {
        self.availability.read().any_available()
    }

    /// Get (lazily creating) the adapter for an engine.
    pub async fn get(&self, kind: EngineKind) -> Result<Arc<dyn TtsEngine>, TtsError> {
        if !self.is_available(kind) {
            return Err(TtsError::Engine(voicehub_core::EngineError::Unavailable(
                kind.as_str().to_string(),
            )));
        }

        if let Some(engine) = self.engines.get(&kind) {
            return Ok(engine.value().clone());
        }

        let _guard = self.init_lock.lock().await;
        if let Some(engine) = self.engines.get(&kind) {
            return Ok(engine.value().clone());
        }

        let engine = create_engine(kind, self.catalog.clone());
        engine.initialize().await?;
        tracing::info!(engine = %kind, "TTS engine initialized");
        self.engines.insert(kind, engine.clone());
        Ok(engine)
    }

    /// Resolve an engine request ("auto" or a concrete name) for a voice.
    ///
    /// `preference` orders the candidates tried for "auto"; an engine
    /// qualifies when it is available and the voice has an asset for it.
    pub fn resolve(
        &self,
        requested: &str,
        voice: &str,
        preference: &[EngineKind],
    ) -> Option<EngineKind> {
        let usable = |kind: EngineKind| {
            self.is_available(kind)
                && self
                    .catalog
                    .get(voice)
                    .map(|v| v.supports(kind))
                    .unwrap_or(false)
        };

        if !requested.trim().eq_ignore_ascii_case("auto") {
            let kind = EngineKind::parse(requested)?;
            return usable(kind).then_some(kind);
        }

        preference.iter().copied().find(|&kind| usable(kind))
    }

    /// Discovery payload for `get_tts_info`
    pub fn engines_info(&self) -> Vec<TtsEngineInfo> {
        EngineKind::all()
            .into_iter()
            .map(|kind| TtsEngineInfo {
                engine: kind,
                available: self.is_available(kind),
                voices: self.catalog.voices_for(kind),
            })
            .collect()
    }

    /// Can at least one engine be constructed and initialized? Used by the
    /// health endpoint.
    pub async fn probe(&self) -> bool {
        for kind in EngineKind::all() {
            if self.is_available(kind) && self.get(kind).await.is_ok() {
                return true;
            }
        }
        false
    }
}

/// Preferred "auto" order for the intro track: lowest time-to-first-audio
pub const INTRO_PREFERENCE: [EngineKind; 3] =
    [EngineKind::Piper, EngineKind::Kokoro, EngineKind::Zonos];

/// Preferred "auto" order for the main track: highest quality first
pub const MAIN_PREFERENCE: [EngineKind; 3] =
    [EngineKind::Zonos, EngineKind::Kokoro, EngineKind::Piper];
