//! Staged TTS orchestrator
//!
//! One sequence per reply: the intro engine produces chunk 0 while the main
//! engine works on the body chunks in parallel. An emitter task holds a
//! cursor and delivers chunks strictly by ascending index, applying the
//! per-chunk deadline and the intro-engine fallback, and always terminates
//! the sequence with exactly one end event.
//!
//! Sequence states: Planned -> Preparing -> EmittingIntro -> EmittingMain ->
//! Completed | PartiallyFailed | Cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use voicehub_config::StagedTtsConfig;
use voicehub_core::{EngineKind, SequenceId, SynthesisParams, SynthesisRequest};
use voicehub_pipeline::AudioPost;

use crate::cache::{CachedAudio, Fingerprint, FingerprintCache};
use crate::registry::{EngineRegistry, INTRO_PREFERENCE, MAIN_PREFERENCE};
use crate::text::ChunkPlan;
use crate::TtsError;

/// One emitted chunk
#[derive(Debug, Clone)]
pub struct ChunkEvent {
    pub sequence_id: SequenceId,
    pub index: u32,
    pub total: u32,
    pub engine: EngineKind,
    pub text: String,
    /// Post-processed PCM; `None` on a failed chunk
    pub samples: Option<Arc<[f32]>>,
    pub sample_rate: u32,
    pub success: bool,
}

/// Events delivered to the session, ending with exactly one `End`
#[derive(Debug, Clone)]
pub enum TtsSequenceEvent {
    Chunk(ChunkEvent),
    End { sequence_id: SequenceId },
}

/// Cloneable cancel handle for one sequence
#[derive(Clone)]
pub struct SequenceCancel(Arc<watch::Sender<bool>>);

impl SequenceCancel {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Handle owned by the session for one running sequence
pub struct SequenceHandle {
    pub sequence_id: SequenceId,
    pub events: mpsc::Receiver<TtsSequenceEvent>,
    cancel: SequenceCancel,
}

impl SequenceHandle {
    /// Cancel the sequence: main-engine work is aborted, an in-flight intro
    /// synthesis may run to completion, and the end event is still emitted
    /// on a best-effort basis.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Detachable cancel handle, usable after the receiver moved elsewhere.
    pub fn canceller(&self) -> SequenceCancel {
        self.cancel.clone()
    }
}

/// Request to speak one reply, carrying per-session overrides
#[derive(Debug, Clone)]
pub struct SpeakRequest {
    pub text: String,
    pub language: String,
    pub voice: String,
    /// Engine name or "auto"
    pub intro_engine: String,
    /// Engine name or "auto"
    pub main_engine: String,
    pub params: SynthesisParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceState {
    Planned,
    Preparing,
    EmittingIntro,
    EmittingMain,
    Completed,
    PartiallyFailed,
    Cancelled,
}

/// Orchestrator counters, exposed via `staged_tts_control{action:"get_stats"}`
#[derive(Debug, Default)]
pub struct StagedStats {
    pub sequences_started: AtomicU64,
    pub sequences_completed: AtomicU64,
    pub sequences_cancelled: AtomicU64,
    pub chunks_emitted: AtomicU64,
    pub chunks_failed: AtomicU64,
    pub fallback_count: AtomicU64,
}

enum SlotOutcome {
    Ready(Result<Arc<CachedAudio>, TtsError>),
    ProducerGone,
    TimedOut,
    Cancelled,
}

/// Wait for a producer slot under the chunk deadline, watching for
/// cancellation. A dropped cancel sender means the session handle is gone
/// and counts as cancellation.
async fn wait_for_slot(
    slot: oneshot::Receiver<Result<Arc<CachedAudio>, TtsError>>,
    chunk_timeout: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> SlotOutcome {
    // Small grace on top of the producer's own deadline so producer-side
    // timeouts surface as errors rather than emitter-side timeouts.
    let deadline = chunk_timeout + Duration::from_millis(250);
    let timed = tokio::time::timeout(deadline, slot);
    tokio::pin!(timed);

    loop {
        tokio::select! {
            result = &mut timed => {
                return match result {
                    Ok(Ok(inner)) => SlotOutcome::Ready(inner),
                    Ok(Err(_)) => SlotOutcome::ProducerGone,
                    Err(_) => SlotOutcome::TimedOut,
                };
            }
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return SlotOutcome::Cancelled;
                }
            }
        }
    }
}

/// The staged two-engine TTS orchestrator
pub struct StagedTts {
    registry: Arc<EngineRegistry>,
    cache: Arc<FingerprintCache>,
    post: AudioPost,
    config: RwLock<StagedTtsConfig>,
    stats: Arc<StagedStats>,
}

impl StagedTts {
    pub fn new(
        registry: Arc<EngineRegistry>,
        cache: Arc<FingerprintCache>,
        post: AudioPost,
        config: StagedTtsConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            post,
            config: RwLock::new(config),
            stats: Arc::new(StagedStats::default()),
        }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<StagedStats> {
        &self.stats
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.config.write().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    /// Apply a `staged_tts_control{action:"configure"}` patch. Unknown keys
    /// are ignored; known keys replace the current value.
    pub fn configure(&self, patch: &serde_json::Value) {
        let mut config = self.config.write();
        if let Some(v) = patch.get("enabled").and_then(|v| v.as_bool()) {
            config.enabled = v;
        }
        if let Some(v) = patch.get("max_response_length").and_then(|v| v.as_u64()) {
            config.max_response_length = v as usize;
        }
        if let Some(v) = patch.get("max_intro_length").and_then(|v| v.as_u64()) {
            config.max_intro_length = v as usize;
        }
        if let Some(v) = patch.get("chunk_timeout_secs").and_then(|v| v.as_u64()) {
            config.chunk_timeout_secs = v;
        }
        if let Some(v) = patch.get("max_chunks").and_then(|v| v.as_u64()) {
            config.max_chunks = (v as usize).min(config.max_chunks_forced);
        }
        if let Some(v) = patch.get("crossfade_ms").and_then(|v| v.as_u64()) {
            config.crossfade_ms = v;
        }
        if let Some(v) = patch.get("intro_engine").and_then(|v| v.as_str()) {
            config.intro_engine = v.to_string();
        }
        if let Some(v) = patch.get("main_engine").and_then(|v| v.as_str()) {
            config.main_engine = v.to_string();
        }
        tracing::info!(?patch, "Staged TTS reconfigured");
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Stats payload for the control channel
    pub fn stats_json(&self) -> serde_json::Value {
        let cache = self.cache.stats();
        serde_json::json!({
            "sequences_started": self.stats.sequences_started.load(Ordering::Relaxed),
            "sequences_completed": self.stats.sequences_completed.load(Ordering::Relaxed),
            "sequences_cancelled": self.stats.sequences_cancelled.load(Ordering::Relaxed),
            "chunks_emitted": self.stats.chunks_emitted.load(Ordering::Relaxed),
            "chunks_failed": self.stats.chunks_failed.load(Ordering::Relaxed),
            "fallback_count": self.stats.fallback_count.load(Ordering::Relaxed),
            "cache": cache,
        })
    }

    /// Start a sequence for one reply. Chunk events arrive on the returned
    /// handle strictly in index order, terminated by exactly one end event.
    pub fn speak(self: &Arc<Self>, request: SpeakRequest) -> SequenceHandle {
        let sequence_id = SequenceId::new();
        let config = self.config.read().clone();
        let (event_tx, event_rx) = mpsc::channel(config.max_chunks_forced + 4);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        self.stats.sequences_started.fetch_add(1, Ordering::Relaxed);

        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator
                .run_sequence(sequence_id, request, config, event_tx, cancel_rx)
                .await;
        });

        SequenceHandle {
            sequence_id,
            events: event_rx,
            cancel: SequenceCancel(Arc::new(cancel_tx)),
        }
    }

    async fn run_sequence(
        self: Arc<Self>,
        sequence_id: SequenceId,
        request: SpeakRequest,
        config: StagedTtsConfig,
        events: mpsc::Sender<TtsSequenceEvent>,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut state = SequenceState::Planned;
        tracing::debug!(sequence_id = %sequence_id, state = ?state, "Sequence created");

        let intro_kind = self
            .registry
            .resolve(&request.intro_engine, &request.voice, &INTRO_PREFERENCE);
        let main_kind = self
            .registry
            .resolve(&request.main_engine, &request.voice, &MAIN_PREFERENCE);

        // Same engine on both tracks disables staging: one monolithic
        // sequence through that engine. No engine at all ends the sequence
        // with zero chunks.
        let (staged, engine_plan) = match (intro_kind, main_kind) {
            (Some(intro), Some(main)) if intro != main && config.enabled => {
                (true, (Some(intro), main))
            }
            (intro, Some(main)) => (false, (intro, main)),
            (Some(intro), None) => (false, (None, intro)),
            (None, None) => {
                tracing::warn!(
                    sequence_id = %sequence_id,
                    voice = %request.voice,
                    "No TTS engine resolvable, ending sequence without chunks"
                );
                let _ = events.send(TtsSequenceEvent::End { sequence_id }).await;
                return;
            }
        };
        let (intro_engine, main_engine) = engine_plan;

        state = SequenceState::Preparing;
        tracing::debug!(sequence_id = %sequence_id, state = ?state, staged, "Planning chunks");

        let plan = ChunkPlan::prepare(&request.text, &config, staged);
        if plan.is_empty() {
            let _ = events.send(TtsSequenceEvent::End { sequence_id }).await;
            return;
        }
        let total = plan.total_chunks();
        let chunk_timeout = Duration::from_secs(config.chunk_timeout_secs.max(1));

        // Producer tracks: one oneshot slot per chunk index.
        let mut slots: Vec<oneshot::Receiver<Result<Arc<CachedAudio>, TtsError>>> = Vec::new();
        let mut texts: Vec<(u32, String, EngineKind)> = Vec::new();
        let mut main_tasks: Vec<JoinHandle<()>> = Vec::new();
        let mut index = 0u32;

        if let Some(intro_text) = plan.intro.clone() {
            let engine = intro_engine.unwrap_or(main_engine);
            let (tx, rx) = oneshot::channel();
            slots.push(rx);
            texts.push((index, intro_text.clone(), engine));
            let this = self.clone();
            let req = request.clone();
            // Intro track: deliberately not tracked for cancel-abort, a
            // running intro synthesis may finish.
            tokio::spawn(async move {
                let result = this
                    .synthesize_chunk(engine, &intro_text, &req, chunk_timeout)
                    .await;
                let _ = tx.send(result);
            });
            index += 1;
        }

        for text in plan.main.clone() {
            let (tx, rx) = oneshot::channel();
            slots.push(rx);
            texts.push((index, text.clone(), main_engine));
            let this = self.clone();
            let req = request.clone();
            let handle = tokio::spawn(async move {
                let result = this
                    .synthesize_chunk(main_engine, &text, &req, chunk_timeout)
                    .await;
                let _ = tx.send(result);
            });
            main_tasks.push(handle);
            index += 1;
        }

        // Emission: strict cursor order with per-chunk deadline and fallback.
        let mut any_failed = false;
        let mut cancelled = false;

        for (slot, (chunk_index, text, planned_engine)) in slots.into_iter().zip(texts) {
            state = if chunk_index == 0 && staged {
                SequenceState::EmittingIntro
            } else {
                SequenceState::EmittingMain
            };
            tracing::trace!(sequence_id = %sequence_id, state = ?state, chunk = chunk_index, "Awaiting chunk");

            let outcome = match wait_for_slot(slot, chunk_timeout, &mut cancel).await {
                SlotOutcome::Ready(result) => result,
                SlotOutcome::ProducerGone => Err(TtsError::ChunkFailed {
                    index: chunk_index,
                    message: "producer dropped".into(),
                }),
                SlotOutcome::TimedOut => Err(TtsError::Timeout),
                SlotOutcome::Cancelled => {
                    cancelled = true;
                    break;
                }
            };

            let (audio, engine_used, success) = match outcome {
                Ok(audio) => (Some(audio), planned_engine, true),
                Err(e) => {
                    tracing::warn!(
                        sequence_id = %sequence_id,
                        chunk = chunk_index,
                        engine = %planned_engine,
                        error = %e,
                        "Chunk synthesis failed, trying fallback engine"
                    );
                    match self
                        .fallback_chunk(
                            chunk_index,
                            &text,
                            planned_engine,
                            intro_engine,
                            main_engine,
                            staged,
                            &request,
                            chunk_timeout,
                        )
                        .await
                    {
                        Some((audio, engine)) => {
                            self.stats.fallback_count.fetch_add(1, Ordering::Relaxed);
                            (Some(audio), engine, true)
                        }
                        None => {
                            any_failed = true;
                            self.stats.chunks_failed.fetch_add(1, Ordering::Relaxed);
                            (None, planned_engine, false)
                        }
                    }
                }
            };

            let event = ChunkEvent {
                sequence_id,
                index: chunk_index,
                total,
                engine: engine_used,
                text,
                sample_rate: audio
                    .as_ref()
                    .map(|a| a.sample_rate)
                    .unwrap_or(self.post.target_sample_rate),
                samples: audio.map(|a| a.samples.clone()),
                success,
            };
            self.stats.chunks_emitted.fetch_add(1, Ordering::Relaxed);
            if events.send(TtsSequenceEvent::Chunk(event)).await.is_err() {
                // Session is gone; stop producing, still attempt the end event.
                cancelled = true;
                break;
            }
        }

        if cancelled {
            for task in &main_tasks {
                task.abort();
            }
            state = SequenceState::Cancelled;
            self.stats.sequences_cancelled.fetch_add(1, Ordering::Relaxed);
        } else if any_failed {
            state = SequenceState::PartiallyFailed;
            self.stats.sequences_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            state = SequenceState::Completed;
            self.stats.sequences_completed.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(sequence_id = %sequence_id, state = ?state, "Sequence finished");

        // Exactly one end event, on every path, best-effort on cancel.
        let _ = events.send(TtsSequenceEvent::End { sequence_id }).await;
    }

    /// Degraded retry for a failed chunk. Main chunks retry once on the
    /// intro engine; the intro chunk is never retried on the intro engine
    /// again - it is served by the main engine in place.
    #[allow(clippy::too_many_arguments)]
    async fn fallback_chunk(
        &self,
        chunk_index: u32,
        text: &str,
        failed_engine: EngineKind,
        intro_engine: Option<EngineKind>,
        main_engine: EngineKind,
        staged: bool,
        request: &SpeakRequest,
        chunk_timeout: Duration,
    ) -> Option<(Arc<CachedAudio>, EngineKind)> {
        let fallback = if staged && chunk_index == 0 {
            // Intro failed: the main engine takes its place.
            Some(main_engine)
        } else {
            intro_engine.filter(|&intro| intro != failed_engine)
        };

        let fallback = fallback?;
        match self
            .synthesize_chunk(fallback, text, request, chunk_timeout)
            .await
        {
            Ok(audio) => Some((audio, fallback)),
            Err(e) => {
                tracing::warn!(
                    chunk = chunk_index,
                    engine = %fallback,
                    error = %e,
                    "Fallback synthesis failed"
                );
                None
            }
        }
    }

    /// Producer path for one chunk: cache lookup, engine synthesis under the
    /// chunk deadline, then post-processing. The cached PCM is final.
    async fn synthesize_chunk(
        &self,
        engine_kind: EngineKind,
        text: &str,
        request: &SpeakRequest,
        chunk_timeout: Duration,
    ) -> Result<Arc<CachedAudio>, TtsError> {
        let fingerprint = Fingerprint::new(
            engine_kind,
            &request.voice,
            &request.language,
            request.params.speed,
            text,
        );

        let registry = self.registry.clone();
        let post = self.post.clone();
        let synthesis = SynthesisRequest {
            text: text.to_string(),
            voice: request.voice.clone(),
            language: request.language.clone(),
            params: request.params.clone(),
        };

        self.cache
            .get_or_synthesize(fingerprint, async move {
                let engine = registry.get(engine_kind).await?;
                let raw = tokio::time::timeout(chunk_timeout, engine.synthesize(&synthesis))
                    .await
                    .map_err(|_| TtsError::Timeout)??;

                let processed = post.process(&raw.samples, raw.sample_rate.as_u32());
                Ok(CachedAudio {
                    samples: processed.into(),
                    sample_rate: post.target_sample_rate,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use voicehub_config::{EngineAvailability, VoiceCatalog};
    use voicehub_core::{EngineError, SampleRate, SynthesizedAudio, TtsEngine, VoiceInfo};

    /// Scriptable engine for orchestration tests
    struct ScriptedEngine {
        kind: EngineKind,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl TtsEngine for ScriptedEngine {
        fn kind(&self) -> EngineKind {
            self.kind
        }

        async fn initialize(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn synthesize(
            &self,
            request: &SynthesisRequest,
        ) -> Result<SynthesizedAudio, EngineError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(EngineError::Synthesis("scripted failure".into()));
            }
            Ok(SynthesizedAudio {
                samples: vec![0.1; request.text.len().max(8) * 10],
                sample_rate: SampleRate::Hz24000,
            })
        }

        fn list_voices(&self) -> Vec<VoiceInfo> {
            vec![VoiceInfo {
                id: "de-thorsten-low".into(),
                engine: self.kind,
                language: "de".into(),
            }]
        }

        fn is_available(&self) -> bool {
            true
        }

        fn native_sample_rate(&self) -> SampleRate {
            SampleRate::Hz24000
        }
    }

    fn orchestrator_with(
        intro_delay: Duration,
        main_delay: Duration,
        main_fails: bool,
        config: StagedTtsConfig,
    ) -> Arc<StagedTts> {
        let registry = Arc::new(EngineRegistry::new(
            Arc::new(VoiceCatalog::builtin()),
            EngineAvailability::default(),
        ));
        registry.register(Arc::new(ScriptedEngine {
            kind: EngineKind::Piper,
            delay: intro_delay,
            fail: false,
        }));
        registry.register(Arc::new(ScriptedEngine {
            kind: EngineKind::Zonos,
            delay: main_delay,
            fail: main_fails,
        }));

        Arc::new(StagedTts::new(
            registry,
            Arc::new(FingerprintCache::new(64, true)),
            AudioPost {
                target_sample_rate: 24000,
                loudness_normalize: false,
                limiter_ceiling_dbfs: -1.0,
            },
            config,
        ))
    }

    fn speak_request(text: &str) -> SpeakRequest {
        SpeakRequest {
            text: text.to_string(),
            language: "de".into(),
            voice: "de-thorsten-low".into(),
            intro_engine: "auto".into(),
            main_engine: "auto".into(),
            params: SynthesisParams::default(),
        }
    }

    fn long_text() -> String {
        "Guten Morgen, hier ist eine wirklich ausfuehrliche Antwort. ".repeat(8)
    }

    async fn collect(handle: &mut SequenceHandle) -> (Vec<ChunkEvent>, usize) {
        let mut chunks = Vec::new();
        let mut ends = 0;
        while let Some(event) = handle.events.recv().await {
            match event {
                TtsSequenceEvent::Chunk(chunk) => chunks.push(chunk),
                TtsSequenceEvent::End { .. } => ends += 1,
            }
        }
        (chunks, ends)
    }

    #[tokio::test]
    async fn test_ordered_chunks_and_single_end() {
        let staged = orchestrator_with(
            Duration::from_millis(5),
            // Main slower than intro: later chunks finish after earlier ones
            // are already awaited, ordering must still hold.
            Duration::from_millis(40),
            false,
            StagedTtsConfig::default(),
        );
        let mut handle = staged.speak(speak_request(&long_text()));
        let (chunks, ends) = collect(&mut handle).await;

        assert!(chunks.len() >= 2, "expected intro + main chunks");
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as u32);
            assert!(chunk.success);
        }
        assert_eq!(ends, 1);
        assert_eq!(chunks[0].engine, EngineKind::Piper);
        assert!(chunks[1..].iter().all(|c| c.engine == EngineKind::Zonos));
        assert_eq!(chunks[0].total, chunks.len() as u32);
    }

    #[tokio::test]
    async fn test_main_engine_failure_falls_back_to_intro_engine() {
        let staged = orchestrator_with(
            Duration::from_millis(1),
            Duration::from_millis(1),
            true,
            StagedTtsConfig::default(),
        );
        let mut handle = staged.speak(speak_request(&long_text()));
        let (chunks, ends) = collect(&mut handle).await;

        assert_eq!(ends, 1);
        assert!(chunks.iter().all(|c| c.success));
        // Every main chunk was served by the intro engine.
        assert!(chunks.iter().all(|c| c.engine == EngineKind::Piper));
        let fallbacks = staged.stats().fallback_count.load(Ordering::Relaxed);
        assert_eq!(fallbacks as usize, chunks.len() - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_main_timeout_falls_back() {
        let mut config = StagedTtsConfig::default();
        config.chunk_timeout_secs = 1;
        let staged = orchestrator_with(
            Duration::from_millis(5),
            Duration::from_secs(30),
            false,
            config,
        );
        let mut handle = staged.speak(speak_request(&long_text()));
        let (chunks, ends) = collect(&mut handle).await;

        assert_eq!(ends, 1);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.engine == EngineKind::Piper));
        assert!(staged.stats().fallback_count.load(Ordering::Relaxed) > 0);
    }

    #[tokio::test]
    async fn test_no_engine_emits_bare_end() {
        let registry = Arc::new(EngineRegistry::new(
            Arc::new(VoiceCatalog::builtin()),
            EngineAvailability::default(),
        ));
        let staged = Arc::new(StagedTts::new(
            registry,
            Arc::new(FingerprintCache::new(8, true)),
            AudioPost::default(),
            StagedTtsConfig::default(),
        ));
        let mut handle = staged.speak(speak_request("Hallo Welt"));
        let (chunks, ends) = collect(&mut handle).await;
        assert!(chunks.is_empty());
        assert_eq!(ends, 1);
    }

    #[tokio::test]
    async fn test_same_engine_disables_staging() {
        let registry = Arc::new(EngineRegistry::new(
            Arc::new(VoiceCatalog::builtin()),
            EngineAvailability::default(),
        ));
        registry.register(Arc::new(ScriptedEngine {
            kind: EngineKind::Zonos,
            delay: Duration::from_millis(1),
            fail: false,
        }));
        let staged = Arc::new(StagedTts::new(
            registry,
            Arc::new(FingerprintCache::new(8, true)),
            AudioPost::default(),
            StagedTtsConfig::default(),
        ));

        let mut request = speak_request(&long_text());
        request.intro_engine = "zonos".into();
        request.main_engine = "zonos".into();
        let mut handle = staged.speak(request);
        let (chunks, ends) = collect(&mut handle).await;

        assert_eq!(ends, 1);
        assert!(chunks.iter().all(|c| c.engine == EngineKind::Zonos));
    }

    #[tokio::test]
    async fn test_cancel_still_emits_end() {
        let staged = orchestrator_with(
            Duration::from_millis(1),
            Duration::from_millis(200),
            false,
            StagedTtsConfig::default(),
        );
        let mut handle = staged.speak(speak_request(&long_text()));

        // Take the first chunk, then cancel mid-sequence.
        let first = handle.events.recv().await.unwrap();
        assert!(matches!(first, TtsSequenceEvent::Chunk(_)));
        handle.cancel();

        let mut ends = 0;
        while let Some(event) = handle.events.recv().await {
            if matches!(event, TtsSequenceEvent::End { .. }) {
                ends += 1;
            }
        }
        assert_eq!(ends, 1);
        assert_eq!(
            staged.stats().sequences_cancelled.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_configure_patch() {
        let staged = orchestrator_with(
            Duration::from_millis(1),
            Duration::from_millis(1),
            false,
            StagedTtsConfig::default(),
        );
        staged.configure(&serde_json::json!({
            "enabled": false,
            "max_chunks": 2,
            "intro_engine": "kokoro",
        }));
        assert!(!staged.is_enabled());
        assert_eq!(staged.config.read().max_chunks, 2);
        assert_eq!(staged.config.read().intro_engine, "kokoro");
    }
}
