//! TTS engine adapters
//!
//! Three adapters cover the engine matrix: `piper` (fast CPU, low latency),
//! `zonos` (high quality, expensive), and `kokoro` (compact multilingual).
//! With the `onnx` feature the piper adapter runs a real model; without it
//! every adapter produces deterministic shaped tones so the full pipeline
//! stays exercisable in development and tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;

use voicehub_config::VoiceCatalog;
use voicehub_core::{
    EngineError, EngineKind, SampleRate, SynthesisRequest, SynthesizedAudio, TtsEngine, VoiceInfo,
};

/// Build the adapter for an engine kind
pub fn create_engine(kind: EngineKind, catalog: Arc<VoiceCatalog>) -> Arc<dyn TtsEngine> {
    match kind {
        EngineKind::Piper => Arc::new(PiperEngine::new(catalog)),
        EngineKind::Zonos => Arc::new(ZonosEngine::new(catalog)),
        EngineKind::Kokoro => Arc::new(KokoroEngine::new(catalog)),
    }
}

fn voices_of(catalog: &VoiceCatalog, kind: EngineKind) -> Vec<VoiceInfo> {
    catalog
        .voices()
        .iter()
        .filter(|v| v.supports(kind))
        .map(|v| VoiceInfo {
            id: v.id.clone(),
            engine: kind,
            language: v.language.clone(),
        })
        .collect()
}

/// Deterministic tone synthesis used by the model-less adapters.
///
/// The pitch is derived from the voice id, the duration from the text
/// length and speaking rate, so identical requests yield identical PCM.
fn synth_tone(
    request: &SynthesisRequest,
    rate: SampleRate,
    harmonics: &[(f32, f32)],
) -> Vec<f32> {
    let mut hasher = DefaultHasher::new();
    request.voice.hash(&mut hasher);
    let base_freq = 110.0 + (hasher.finish() % 180) as f32;

    let chars = request.text.chars().count().max(4);
    let speed = request.params.speed.clamp(0.25, 4.0);
    let duration_ms = ((chars as f32 * 45.0) / speed).clamp(240.0, 8000.0);
    let n = (rate.as_u32() as f32 * duration_ms / 1000.0) as usize;

    let volume = request.params.volume.clamp(0.0, 2.0) * 0.3;
    let sr = rate.as_u32() as f32;

    (0..n)
        .map(|i| {
            let t = i as f32 / sr;
            // Attack/release envelope keeps chunk joins crossfade-friendly.
            let pos = i as f32 / n as f32;
            let envelope = (pos * 40.0).min(1.0) * ((1.0 - pos) * 40.0).min(1.0);
            let mut sample = 0.0;
            for &(mult, gain) in harmonics {
                sample += gain * (2.0 * std::f32::consts::PI * base_freq * mult * t).sin();
            }
            sample * envelope * volume
        })
        .collect()
}

fn check_voice(catalog: &VoiceCatalog, kind: EngineKind, voice: &str) -> Result<(), EngineError> {
    match catalog.get(voice) {
        Some(v) if v.supports(kind) => Ok(()),
        Some(_) => Err(EngineError::Unavailable(format!(
            "voice '{voice}' has no {kind} asset"
        ))),
        None => Err(EngineError::Unavailable(format!("unknown voice '{voice}'"))),
    }
}

// ---------------------------------------------------------------------------
// Piper: fast CPU engine
// ---------------------------------------------------------------------------

pub struct PiperEngine {
    catalog: Arc<VoiceCatalog>,
    #[cfg(feature = "onnx")]
    sessions: dashmap::DashMap<String, Arc<parking_lot::Mutex<ort::session::Session>>>,
}

impl PiperEngine {
    pub fn new(catalog: Arc<VoiceCatalog>) -> Self {
        Self {
            catalog,
            #[cfg(feature = "onnx")]
            sessions: dashmap::DashMap::new(),
        }
    }

    #[cfg(feature = "onnx")]
    fn session_for(
        &self,
        voice: &str,
    ) -> Result<Arc<parking_lot::Mutex<ort::session::Session>>, EngineError> {
        use ort::session::{builder::GraphOptimizationLevel, Session};

        if let Some(session) = self.sessions.get(voice) {
            return Ok(session.value().clone());
        }

        let model_path = self
            .catalog
            .get(voice)
            .and_then(|v| v.piper_model.clone())
            .ok_or_else(|| EngineError::Unavailable(format!("no piper model for '{voice}'")))?;

        let session = Session::builder()
            .map_err(|e| EngineError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EngineError::Model(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| EngineError::Model(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e| EngineError::Model(e.to_string()))?;

        let session = Arc::new(parking_lot::Mutex::new(session));
        self.sessions.insert(voice.to_string(), session.clone());
        Ok(session)
    }

    #[cfg(feature = "onnx")]
    fn synthesize_model(&self, request: &SynthesisRequest) -> Result<Vec<f32>, EngineError> {
        use ndarray::Array2;
        use ort::value::Tensor;

        let session = self.session_for(&request.voice)?;
        let text_ids: Vec<i64> = request.text.chars().map(|c| c as i64).collect();

        let input = Array2::from_shape_vec((1, text_ids.len()), text_ids)
            .map_err(|e| EngineError::Synthesis(e.to_string()))?;
        let input_lengths = Array2::from_shape_vec((1, 1), vec![request.text.chars().count() as i64])
            .map_err(|e| EngineError::Synthesis(e.to_string()))?;
        let scales = Array2::from_shape_vec(
            (1, 3),
            vec![0.667, 1.0 / request.params.speed.clamp(0.25, 4.0), 0.8],
        )
        .map_err(|e| EngineError::Synthesis(e.to_string()))?;

        let mut session = session.lock();
        let outputs = session
            .run(ort::inputs![
                "input" => Tensor::from_array(input).map_err(|e| EngineError::Model(e.to_string()))?,
                "input_lengths" => Tensor::from_array(input_lengths).map_err(|e| EngineError::Model(e.to_string()))?,
                "scales" => Tensor::from_array(scales).map_err(|e| EngineError::Model(e.to_string()))?,
            ])
            .map_err(|e| EngineError::Model(e.to_string()))?;

        let audio = outputs["output"]
            .try_extract_array::<f32>()
            .map_err(|e| EngineError::Model(e.to_string()))?;

        Ok(audio.iter().copied().collect())
    }
}

#[async_trait]
impl TtsEngine for PiperEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Piper
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        if voices_of(&self.catalog, EngineKind::Piper).is_empty() {
            return Err(EngineError::Unavailable("no piper voices".into()));
        }
        Ok(())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio, EngineError> {
        check_voice(&self.catalog, EngineKind::Piper, &request.voice)?;

        #[cfg(feature = "onnx")]
        {
            let samples = tokio::task::block_in_place(|| self.synthesize_model(request))?;
            return Ok(SynthesizedAudio {
                samples,
                sample_rate: self.native_sample_rate(),
            });
        }

        #[cfg(not(feature = "onnx"))]
        {
            // Single partial keeps the intro voice deliberately plain.
            let samples = synth_tone(request, self.native_sample_rate(), &[(1.0, 1.0)]);
            Ok(SynthesizedAudio {
                samples,
                sample_rate: self.native_sample_rate(),
            })
        }
    }

    fn list_voices(&self) -> Vec<VoiceInfo> {
        voices_of(&self.catalog, EngineKind::Piper)
    }

    fn is_available(&self) -> bool {
        !voices_of(&self.catalog, EngineKind::Piper).is_empty()
    }

    fn native_sample_rate(&self) -> SampleRate {
        SampleRate::Hz22050
    }
}

// ---------------------------------------------------------------------------
// Zonos: high-quality engine
// ---------------------------------------------------------------------------

pub struct ZonosEngine {
    catalog: Arc<VoiceCatalog>,
}

impl ZonosEngine {
    pub fn new(catalog: Arc<VoiceCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl TtsEngine for ZonosEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Zonos
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        if voices_of(&self.catalog, EngineKind::Zonos).is_empty() {
            return Err(EngineError::Unavailable("no zonos speakers".into()));
        }
        Ok(())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio, EngineError> {
        check_voice(&self.catalog, EngineKind::Zonos, &request.voice)?;
        let samples = synth_tone(
            request,
            self.native_sample_rate(),
            &[(1.0, 0.7), (2.0, 0.2), (3.0, 0.1)],
        );
        Ok(SynthesizedAudio {
            samples,
            sample_rate: self.native_sample_rate(),
        })
    }

    fn list_voices(&self) -> Vec<VoiceInfo> {
        voices_of(&self.catalog, EngineKind::Zonos)
    }

    fn is_available(&self) -> bool {
        !voices_of(&self.catalog, EngineKind::Zonos).is_empty()
    }

    fn native_sample_rate(&self) -> SampleRate {
        SampleRate::Hz44100
    }
}

// ---------------------------------------------------------------------------
// Kokoro: compact multilingual engine
// ---------------------------------------------------------------------------

pub struct KokoroEngine {
    catalog: Arc<VoiceCatalog>,
}

impl KokoroEngine {
    pub fn new(catalog: Arc<VoiceCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl TtsEngine for KokoroEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Kokoro
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        if voices_of(&self.catalog, EngineKind::Kokoro).is_empty() {
            return Err(EngineError::Unavailable("no kokoro voices".into()));
        }
        Ok(())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio, EngineError> {
        check_voice(&self.catalog, EngineKind::Kokoro, &request.voice)?;
        let samples = synth_tone(
            request,
            self.native_sample_rate(),
            &[(1.0, 0.8), (1.5, 0.2)],
        );
        Ok(SynthesizedAudio {
            samples,
            sample_rate: self.native_sample_rate(),
        })
    }

    fn list_voices(&self) -> Vec<VoiceInfo> {
        voices_of(&self.catalog, EngineKind::Kokoro)
    }

    fn is_available(&self) -> bool {
        !voices_of(&self.catalog, EngineKind::Kokoro).is_empty()
    }

    fn native_sample_rate(&self) -> SampleRate {
        SampleRate::Hz24000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicehub_core::SynthesisParams;

    fn request(text: &str, voice: &str) -> SynthesisRequest {
        SynthesisRequest {
            text: text.to_string(),
            voice: voice.to_string(),
            language: "de".to_string(),
            params: SynthesisParams::default(),
        }
    }

    #[cfg(not(feature = "onnx"))]
    #[tokio::test]
    async fn test_synthesis_is_deterministic() {
        let engine = PiperEngine::new(Arc::new(VoiceCatalog::builtin()));
        let a = engine.synthesize(&request("Hallo Welt", "de-thorsten-low")).await.unwrap();
        let b = engine.synthesize(&request("Hallo Welt", "de-thorsten-low")).await.unwrap();
        assert_eq!(a.samples, b.samples);
        assert_eq!(a.sample_rate, SampleRate::Hz22050);
    }

    #[cfg(not(feature = "onnx"))]
    #[tokio::test]
    async fn test_longer_text_yields_longer_audio() {
        let engine = ZonosEngine::new(Arc::new(VoiceCatalog::builtin()));
        let short = engine.synthesize(&request("Ja.", "de-thorsten-low")).await.unwrap();
        let long = engine
            .synthesize(&request(
                "Das ist eine deutlich laengere Antwort mit vielen Woertern darin.",
                "de-thorsten-low",
            ))
            .await
            .unwrap();
        assert!(long.samples.len() > short.samples.len());
    }

    #[tokio::test]
    async fn test_unknown_voice_is_rejected() {
        let engine = KokoroEngine::new(Arc::new(VoiceCatalog::builtin()));
        let err = engine.synthesize(&request("Hallo", "xx-missing")).await;
        assert!(matches!(err, Err(EngineError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_voice_without_engine_asset_is_rejected() {
        // "de-eva-k" declares no kokoro voice.
        let engine = KokoroEngine::new(Arc::new(VoiceCatalog::builtin()));
        let err = engine.synthesize(&request("Hallo", "de-eva-k")).await;
        assert!(matches!(err, Err(EngineError::Unavailable(_))));
    }

    #[cfg(not(feature = "onnx"))]
    #[tokio::test]
    async fn test_speed_shortens_audio() {
        let engine = KokoroEngine::new(Arc::new(VoiceCatalog::builtin()));
        let mut fast = request("Eine ganz normale Antwort bitte.", "de-thorsten-low");
        fast.params.speed = 2.0;
        let normal = engine
            .synthesize(&request("Eine ganz normale Antwort bitte.", "de-thorsten-low"))
            .await
            .unwrap();
        let quick = engine.synthesize(&fast).await.unwrap();
        assert!(quick.samples.len() < normal.samples.len());
    }
}
