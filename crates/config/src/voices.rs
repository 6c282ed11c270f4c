//! Voice asset catalog
//!
//! A canonical voice id maps to per-engine assets: a model file on disk for
//! the fast CPU engine, a speaker id for the high-quality engine, and a voice
//! id for the compact multilingual engine. Validation at startup logs
//! warnings for missing mandatory assets and marks the affected engines
//! unavailable; it never aborts the server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use voicehub_core::EngineKind;

/// Per-engine assets behind one canonical voice id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceAsset {
    /// Canonical voice id, e.g. "de-thorsten-low"
    pub id: String,

    /// Language short code
    pub language: String,

    /// Model file for the fast CPU engine
    #[serde(default)]
    pub piper_model: Option<PathBuf>,

    /// Speaker id for the high-quality engine
    #[serde(default)]
    pub zonos_speaker: Option<String>,

    /// Voice id for the compact multilingual engine
    #[serde(default)]
    pub kokoro_voice: Option<String>,
}

impl VoiceAsset {
    /// Whether this voice has an asset for the given engine
    pub fn supports(&self, engine: EngineKind) -> bool {
        match engine {
            EngineKind::Piper => self.piper_model.is_some(),
            EngineKind::Zonos => self.zonos_speaker.is_some(),
            EngineKind::Kokoro => self.kokoro_voice.is_some(),
        }
    }
}

/// Which engines survived asset validation
#[derive(Debug, Clone, Default)]
pub struct EngineAvailability {
    available: HashMap<EngineKind, bool>,
}

impl EngineAvailability {
    pub fn is_available(&self, engine: EngineKind) -> bool {
        self.available.get(&engine).copied().unwrap_or(false)
    }

    pub fn mark(&mut self, engine: EngineKind, available: bool) {
        self.available.insert(engine, available);
    }

    pub fn any_available(&self) -> bool {
        self.available.values().any(|&a| a)
    }
}

/// The voice catalog loaded at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceCatalog {
    voices: Vec<VoiceAsset>,
}

impl VoiceCatalog {
    /// Built-in catalog used when no `config/voices.yaml` exists
    pub fn builtin() -> Self {
        Self {
            voices: vec![
                VoiceAsset {
                    id: "de-thorsten-low".into(),
                    language: "de".into(),
                    piper_model: Some(PathBuf::from("models/piper/de_DE-thorsten-low.onnx")),
                    zonos_speaker: Some("thorsten".into()),
                    kokoro_voice: Some("af_sky".into()),
                },
                VoiceAsset {
                    id: "de-eva-k".into(),
                    language: "de".into(),
                    piper_model: Some(PathBuf::from("models/piper/de_DE-eva_k-x_low.onnx")),
                    zonos_speaker: Some("eva".into()),
                    kokoro_voice: None,
                },
                VoiceAsset {
                    id: "en-amy-low".into(),
                    language: "en".into(),
                    piper_model: Some(PathBuf::from("models/piper/en_US-amy-low.onnx")),
                    zonos_speaker: None,
                    kokoro_voice: Some("af_bella".into()),
                },
            ],
        }
    }

    /// Load from a JSON catalog file, falling back to the built-in set
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<VoiceCatalog>(&raw) {
                Ok(catalog) => {
                    tracing::info!(path = %path.display(), voices = catalog.voices.len(), "Loaded voice catalog");
                    catalog
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Invalid voice catalog, using builtin");
                    Self::builtin()
                }
            },
            Err(_) => {
                tracing::debug!(path = %path.display(), "No voice catalog file, using builtin");
                Self::builtin()
            }
        }
    }

    pub fn voices(&self) -> &[VoiceAsset] {
        &self.voices
    }

    pub fn get(&self, voice_id: &str) -> Option<&VoiceAsset> {
        self.voices.iter().find(|v| v.id == voice_id)
    }

    /// Voice ids an engine can serve
    pub fn voices_for(&self, engine: EngineKind) -> Vec<String> {
        self.voices
            .iter()
            .filter(|v| v.supports(engine))
            .map(|v| v.id.clone())
            .collect()
    }

    /// Validate assets on disk and derive engine availability.
    ///
    /// The fast CPU engine needs at least one model file present. The other
    /// engines reference remote/bundled speakers, so a declared id is enough.
    pub fn validate(&self) -> EngineAvailability {
        let mut availability = EngineAvailability::default();

        let mut piper_models = 0usize;
        for voice in &self.voices {
            if let Some(path) = &voice.piper_model {
                if path.exists() {
                    piper_models += 1;
                } else {
                    tracing::warn!(
                        voice = %voice.id,
                        path = %path.display(),
                        "Piper voice model missing"
                    );
                }
            }
        }
        availability.mark(EngineKind::Piper, piper_models > 0);

        let zonos_voices = self.voices.iter().filter(|v| v.zonos_speaker.is_some()).count();
        if zonos_voices == 0 {
            tracing::warn!("No zonos speakers declared, engine marked unavailable");
        }
        availability.mark(EngineKind::Zonos, zonos_voices > 0);

        let kokoro_voices = self.voices.iter().filter(|v| v.kokoro_voice.is_some()).count();
        if kokoro_voices == 0 {
            tracing::warn!("No kokoro voices declared, engine marked unavailable");
        }
        availability.mark(EngineKind::Kokoro, kokoro_voices > 0);

        availability
    }
}

impl Default for VoiceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_lookup() {
        let catalog = VoiceCatalog::builtin();
        let voice = catalog.get("de-thorsten-low").unwrap();
        assert_eq!(voice.language, "de");
        assert!(voice.supports(EngineKind::Piper));
        assert!(voice.supports(EngineKind::Zonos));
    }

    #[test]
    fn test_voices_for_engine() {
        let catalog = VoiceCatalog::builtin();
        let kokoro = catalog.voices_for(EngineKind::Kokoro);
        assert!(kokoro.contains(&"de-thorsten-low".to_string()));
        assert!(!kokoro.contains(&"de-eva-k".to_string()));
    }

    #[test]
    fn test_validate_marks_declared_engines() {
        let catalog = VoiceCatalog::builtin();
        let availability = catalog.validate();
        // Speaker-id engines only need declarations; the file-backed engine
        // depends on models being present on disk.
        assert!(availability.is_available(EngineKind::Zonos));
        assert!(availability.is_available(EngineKind::Kokoro));
        assert!(availability.any_available());
    }

    #[test]
    fn test_missing_catalog_falls_back() {
        let catalog = VoiceCatalog::load(Path::new("does/not/exist.json"));
        assert!(!catalog.voices().is_empty());
    }
}
