//! Speech-to-text adapter
//!
//! The adapter owns a worker pool (a semaphore over the configured
//! concurrency) so transcription never blocks a session loop. Segments are
//! already in the in-memory f32 representation the backends consume; there
//! are no temp files and no subprocesses anywhere in this path.

#[cfg(feature = "onnx")]
pub mod whisper;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use voicehub_config::SttConfig;
use voicehub_core::{
    AudioSegment, EngineError, SpeechToText, StreamId, SttModelInfo, Transcription, Utterance,
};

use crate::PipelineError;

/// Builds a backend for a model name; used for lazy model switching
pub type SttBackendLoader =
    Box<dyn Fn(&str) -> Result<Arc<dyn SpeechToText>, EngineError> + Send + Sync>;

/// The STT worker-pool adapter
pub struct SttAdapter {
    backend: Mutex<Arc<dyn SpeechToText>>,
    loader: SttBackendLoader,
    /// Model switch requested via control message, applied on next transcription
    pending_model: Mutex<Option<String>>,
    workers: Arc<Semaphore>,
    timeout: Duration,
    default_language: String,
}

impl SttAdapter {
    pub fn new(config: &SttConfig, backend: Arc<dyn SpeechToText>, loader: SttBackendLoader) -> Self {
        Self {
            backend: Mutex::new(backend),
            loader,
            pending_model: Mutex::new(None),
            workers: Arc::new(Semaphore::new(config.workers.max(1))),
            timeout: Duration::from_secs(config.timeout_secs),
            default_language: config.language.clone(),
        }
    }

    /// Adapter with the built-in model-less backend
    pub fn stub(config: &SttConfig) -> Self {
        let language = config.language.clone();
        Self::new(
            config,
            Arc::new(StubStt::new(&config.model, &config.language)),
            Box::new(move |name| Ok(Arc::new(StubStt::new(name, &language)) as Arc<dyn SpeechToText>)),
        )
    }

    /// Schedule a model switch; it is applied lazily on the next transcription.
    pub fn switch_model(&self, model: &str) {
        tracing::info!(model, "STT model switch scheduled");
        *self.pending_model.lock() = Some(model.to_string());
    }

    /// Transcribe one finalized segment on the worker pool.
    pub async fn transcribe(
        &self,
        stream_id: StreamId,
        segment: AudioSegment,
        language: Option<String>,
    ) -> Result<Utterance, PipelineError> {
        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;

        self.apply_pending_model();

        let backend = self.backend.lock().clone();
        let language = language.unwrap_or_else(|| self.default_language.clone());

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            backend.transcribe(&segment, Some(&language)),
        )
        .await;

        let transcription: Transcription = match result {
            Ok(Ok(t)) => t,
            Ok(Err(e)) => {
                tracing::warn!(stream_id = %stream_id, error = %e, "Transcription failed");
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!(
                    stream_id = %stream_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Transcription deadline exceeded"
                );
                return Err(PipelineError::Timeout);
            }
        };

        tracing::debug!(
            stream_id = %stream_id,
            chars = transcription.text.len(),
            confidence = transcription.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transcription complete"
        );

        Ok(Utterance {
            stream_id,
            text: transcription.text,
            language: if transcription.language.is_empty() {
                language
            } else {
                transcription.language
            },
            confidence: transcription.confidence,
            started_at: segment.started_at,
            ended_at: segment.ended_at,
        })
    }

    fn apply_pending_model(&self) {
        let Some(model) = self.pending_model.lock().take() else {
            return;
        };
        match (self.loader)(&model) {
            Ok(backend) => {
                tracing::info!(model, "STT model switched");
                *self.backend.lock() = backend;
            }
            Err(e) => {
                tracing::warn!(model, error = %e, "STT model switch failed, keeping current model");
            }
        }
    }

    pub fn available_models(&self) -> Vec<SttModelInfo> {
        self.backend.lock().available_models()
    }

    pub fn current_model(&self) -> String {
        self.backend.lock().model_name()
    }

    pub fn gpu_available(&self) -> bool {
        self.backend.lock().gpu_available()
    }

    /// Health probe: the pool is considered responsive while at least one
    /// worker slot is free or can be handed out.
    pub fn is_responsive(&self) -> bool {
        self.workers.available_permits() > 0
    }
}

/// Model-less stand-in backend used when no inference feature is enabled.
///
/// It accepts any segment and yields an empty transcript, which the session
/// treats the same way as silence.
pub struct StubStt {
    model: String,
    language: String,
}

impl StubStt {
    pub fn new(model: &str, language: &str) -> Self {
        Self {
            model: model.to_string(),
            language: language.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl SpeechToText for StubStt {
    async fn transcribe(
        &self,
        _segment: &AudioSegment,
        language: Option<&str>,
    ) -> Result<Transcription, EngineError> {
        Ok(Transcription {
            text: String::new(),
            language: language.unwrap_or(&self.language).to_string(),
            confidence: 0.0,
        })
    }

    fn available_models(&self) -> Vec<SttModelInfo> {
        vec![SttModelInfo {
            name: self.model.clone(),
            loaded: false,
        }]
    }

    fn gpu_available(&self) -> bool {
        false
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicehub_core::SampleRate;

    struct FixedStt(&'static str);

    #[async_trait::async_trait]
    impl SpeechToText for FixedStt {
        async fn transcribe(
            &self,
            _segment: &AudioSegment,
            _language: Option<&str>,
        ) -> Result<Transcription, EngineError> {
            Ok(Transcription {
                text: self.0.to_string(),
                language: "de".into(),
                confidence: 0.92,
            })
        }

        fn available_models(&self) -> Vec<SttModelInfo> {
            vec![SttModelInfo {
                name: "fixed".into(),
                loaded: true,
            }]
        }

        fn gpu_available(&self) -> bool {
            false
        }

        fn model_name(&self) -> String {
            "fixed".into()
        }
    }

    struct SlowStt;

    #[async_trait::async_trait]
    impl SpeechToText for SlowStt {
        async fn transcribe(
            &self,
            _segment: &AudioSegment,
            _language: Option<&str>,
        ) -> Result<Transcription, EngineError> {
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok(Transcription::default())
        }

        fn available_models(&self) -> Vec<SttModelInfo> {
            Vec::new()
        }

        fn gpu_available(&self) -> bool {
            false
        }

        fn model_name(&self) -> String {
            "slow".into()
        }
    }

    fn segment() -> AudioSegment {
        let mut buf = voicehub_core::SegmentBuffer::new(SampleRate::Hz16000);
        let frame = voicehub_core::AudioFrame::new(vec![0.1; 1600], SampleRate::Hz16000, 0, 0);
        buf.push(&frame);
        buf.finalize()
    }

    fn adapter_with(backend: Arc<dyn SpeechToText>) -> SttAdapter {
        SttAdapter::new(
            &SttConfig::default(),
            backend,
            Box::new(|name| Ok(Arc::new(StubStt::new(name, "de")) as Arc<dyn SpeechToText>)),
        )
    }

    #[tokio::test]
    async fn test_transcribe_maps_to_utterance() {
        let adapter = adapter_with(Arc::new(FixedStt("hallo welt")));
        let utterance = adapter
            .transcribe(StreamId::from("mic-1"), segment(), None)
            .await
            .unwrap();
        assert_eq!(utterance.text, "hallo welt");
        assert_eq!(utterance.stream_id.as_str(), "mic-1");
        assert!(utterance.confidence > 0.9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcribe_times_out() {
        let adapter = adapter_with(Arc::new(SlowStt));
        let result = adapter
            .transcribe(StreamId::from("mic-1"), segment(), None)
            .await;
        assert!(matches!(result, Err(PipelineError::Timeout)));
    }

    #[tokio::test]
    async fn test_model_switch_applies_lazily() {
        let adapter = SttAdapter::stub(&SttConfig::default());
        adapter.switch_model("large-v3");
        // Still reports the old model until a transcription applies the switch.
        assert_ne!(adapter.current_model(), "large-v3");

        let _ = adapter
            .transcribe(StreamId::from("mic-1"), segment(), None)
            .await
            .unwrap();
        assert_eq!(adapter.current_model(), "large-v3");
    }

    #[tokio::test]
    async fn test_stub_yields_empty_text() {
        let adapter = SttAdapter::stub(&SttConfig::default());
        let utterance = adapter
            .transcribe(StreamId::from("mic-1"), segment(), Some("de".into()))
            .await
            .unwrap();
        assert!(utterance.is_empty());
        assert_eq!(utterance.language, "de");
    }
}
