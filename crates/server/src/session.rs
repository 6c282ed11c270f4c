//! Session management
//!
//! One [`Session`] per connected client. The transport reader drives the
//! session from a single task, so per-session work is serialized; heavy work
//! (transcription, routing, synthesis) runs on spawned tasks that report
//! back through the internal event channel. Control messages are handled
//! inline and never block audio frames.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voicehub_core::audio::f32_to_pcm16;
use voicehub_core::{
    AudioFrame, ClientMessage, ErrorKind, Features, SampleRate, ServerMessage, SessionId,
    StreamId, Utterance,
};
use voicehub_pipeline::{
    ingest::{IngestEvent, PushOutcome, StreamIngest},
    vad::VadOptions,
};
use voicehub_router::{ChatTurn, LlmOptions};
use voicehub_tts::staged::{SequenceCancel, SpeakRequest, TtsSequenceEvent};

use crate::auth::Principal;
use crate::metrics;
use crate::state::AppState;
use crate::ServerError;

/// Tracks live sessions and enforces the capacity bound
pub struct SessionManager {
    sessions: DashMap<SessionId, ()>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    pub fn try_register(&self) -> Result<SessionId, ServerError> {
        if self.sessions.len() >= self.max_sessions {
            return Err(ServerError::Capacity);
        }
        let id = SessionId::new();
        self.sessions.insert(id, ());
        Ok(id)
    }

    pub fn unregister(&self, id: &SessionId) {
        self.sessions.remove(id);
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

/// Result of enqueueing one outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Queue full; non-audio telemetry was dropped
    DroppedTelemetry,
    /// Queue full on an audio message; the sequence must degrade
    AudioOverflow,
    Closed,
}

/// Bounded outbound queue with the backpressure policy: telemetry is
/// dropped first, audio overflow degrades the active sequence, persistent
/// overflow asks the session to close.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<axum::extract::ws::Message>,
    internal: mpsc::Sender<InternalEvent>,
    consecutive_overflows: Arc<AtomicUsize>,
}

/// Consecutive overflows after which backpressure is considered persistent
const PERSISTENT_OVERFLOW_THRESHOLD: usize = 16;

impl Outbox {
    pub fn new(
        tx: mpsc::Sender<axum::extract::ws::Message>,
        internal: mpsc::Sender<InternalEvent>,
    ) -> Self {
        Self {
            tx,
            internal,
            consecutive_overflows: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Serialize and enqueue a protocol message.
    pub fn send(&self, msg: &ServerMessage) -> SendOutcome {
        let is_audio = msg.is_audio();
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize outbound message");
                return SendOutcome::DroppedTelemetry;
            }
        };

        match self.tx.try_send(axum::extract::ws::Message::Text(json)) {
            Ok(()) => {
                self.consecutive_overflows.store(0, Ordering::Relaxed);
                SendOutcome::Sent
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let overflows = self.consecutive_overflows.fetch_add(1, Ordering::Relaxed) + 1;
                if overflows >= PERSISTENT_OVERFLOW_THRESHOLD {
                    let _ = self.internal.try_send(InternalEvent::PersistentBackpressure);
                }
                if is_audio {
                    SendOutcome::AudioOverflow
                } else {
                    metrics::record_dropped_telemetry();
                    SendOutcome::DroppedTelemetry
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Enqueue a raw frame (ping, close). Best-effort.
    pub fn send_raw(&self, frame: axum::extract::ws::Message) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) {
        metrics::record_error(kind);
        self.send(&ServerMessage::Error {
            kind,
            message: message.into(),
        });
    }
}

/// Events from session-owned background tasks back into the session loop
#[derive(Debug)]
pub enum InternalEvent {
    Transcribed(Utterance),
    SttFailed { stream_id: StreamId },
    ReplyFinished { user: String, assistant: String },
    LlmModels { models: Vec<String> },
    PersistentBackpressure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Ready,
    Closed,
}

/// A reply in flight: the routing/synthesis task plus the cancel handle of
/// its TTS sequence (filled once the sequence starts).
struct ReplyInFlight {
    task: JoinHandle<()>,
    sequence_cancel: Arc<Mutex<Option<SequenceCancel>>>,
}

/// One connected client
pub struct Session {
    pub id: SessionId,
    pub principal: Principal,
    pub features: Features,
    state: SessionState,
    app: AppState,
    outbox: Outbox,
    internal_tx: mpsc::Sender<InternalEvent>,
    ingest_tx: mpsc::Sender<IngestEvent>,

    // Per-session overrides, seeded from configuration.
    tts_engine: String,
    voice: String,
    language: String,
    speed: f32,
    volume: f32,
    vad: VadOptions,
    noise_suppression: bool,
    llm: LlmOptions,
    history: Vec<ChatTurn>,

    active_stream: Option<Arc<StreamIngest>>,
    reply: Option<ReplyInFlight>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        principal: Principal,
        features: Features,
        app: AppState,
        outbox: Outbox,
        internal_tx: mpsc::Sender<InternalEvent>,
        ingest_tx: mpsc::Sender<IngestEvent>,
    ) -> Self {
        let config = app.config.clone();
        Self {
            id,
            principal,
            features,
            state: SessionState::Ready,
            outbox,
            internal_tx,
            ingest_tx,
            tts_engine: config.tts.engine.clone(),
            voice: config.tts.voice.clone(),
            language: config.stt.language.clone(),
            speed: 1.0,
            volume: 1.0,
            vad: VadOptions::from_config(&config.audio),
            noise_suppression: false,
            llm: LlmOptions::default(),
            history: Vec::new(),
            active_stream: None,
            reply: None,
            app,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Handle one parsed client message. Returns `false` when the session
    /// should close.
    pub async fn handle_client_message(&mut self, msg: ClientMessage) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }

        match msg {
            ClientMessage::Hello { .. } => {
                // The handshake already happened; a second hello is a
                // protocol violation but not fatal.
                self.outbox
                    .error(ErrorKind::InvalidMessage, "session already established");
            }
            ClientMessage::StartAudioStream { stream_id } => {
                self.start_audio_stream(StreamId::from(stream_id));
            }
            ClientMessage::AudioChunk {
                stream_id,
                chunk,
                sequence,
                timestamp,
            } => {
                let Ok(pcm) = BASE64.decode(chunk.as_bytes()) else {
                    self.outbox
                        .error(ErrorKind::InvalidMessage, "audio chunk is not valid base64");
                    return true;
                };
                metrics::record_frame_in(pcm.len());
                let frame =
                    AudioFrame::from_pcm16(&pcm, SampleRate::Hz16000, sequence, timestamp);
                self.push_frame(&StreamId::from(stream_id), frame);
            }
            ClientMessage::EndAudioStream { stream_id } => {
                self.end_audio_stream(&StreamId::from(stream_id));
            }
            ClientMessage::Text { content } => {
                self.start_reply(content);
            }
            ClientMessage::Ping { timestamp } => {
                self.outbox.send(&ServerMessage::Pong { timestamp });
            }
            ClientMessage::SwitchTtsEngine { engine } => self.switch_tts_engine(engine),
            ClientMessage::SetTtsVoice { voice, engine } => self.set_tts_voice(voice, engine),
            ClientMessage::SetTtsOptions {
                speed,
                volume,
                language,
            } => {
                if let Some(speed) = speed {
                    self.speed = speed.clamp(0.25, 4.0);
                }
                if let Some(volume) = volume {
                    self.volume = volume.clamp(0.0, 2.0);
                }
                if let Some(language) = language {
                    self.language = language;
                }
                self.outbox.send(&ServerMessage::TtsOptionsUpdated {
                    speed: self.speed,
                    volume: self.volume,
                    language: self.language.clone(),
                });
            }
            ClientMessage::SwitchSttModel { model } => {
                self.app.stt.switch_model(&model);
                self.outbox.send(&ServerMessage::SttModelSwitched { model });
            }
            ClientMessage::GetSttModels => {
                self.outbox.send(&ServerMessage::SttModels {
                    models: self
                        .app
                        .stt
                        .available_models()
                        .into_iter()
                        .map(|m| m.name)
                        .collect(),
                    current: self.app.stt.current_model(),
                });
            }
            ClientMessage::SetAudioOpts {
                vad,
                noise_suppression,
                silence_window_ms,
            } => {
                if let Some(enabled) = vad {
                    self.vad.enabled = enabled;
                }
                if let Some(ns) = noise_suppression {
                    self.noise_suppression = ns;
                }
                if let Some(window) = silence_window_ms {
                    self.vad.silence_window = std::time::Duration::from_millis(window);
                }
                self.outbox.send(&ServerMessage::AudioOptsUpdated {
                    vad: self.vad.enabled,
                    noise_suppression: self.noise_suppression,
                    silence_window_ms: self.vad.silence_window.as_millis() as u64,
                });
            }
            ClientMessage::GetLlmModels => {
                let router = self.app.router.clone();
                let current = self.llm.model.clone();
                let internal = self.internal_tx.clone();
                tokio::spawn(async move {
                    let models = router.agent().list_models(&current).await;
                    let _ = internal.send(InternalEvent::LlmModels { models }).await;
                });
            }
            ClientMessage::SwitchLlmModel { model } => {
                // A model switch invalidates the per-session conversation
                // context.
                self.llm.model = model.clone();
                self.history.clear();
                self.outbox.send(&ServerMessage::LlmModelSwitched { model });
            }
            ClientMessage::SetLlmOptions {
                temperature,
                max_tokens,
                context_turns,
                system_prompt,
            } => {
                if let Some(t) = temperature {
                    self.llm.temperature = t.clamp(0.0, 2.0);
                }
                if let Some(m) = max_tokens {
                    self.llm.max_tokens = m;
                }
                if let Some(c) = context_turns {
                    self.llm.context_turns = c;
                }
                if let Some(p) = system_prompt {
                    self.llm.system_prompt = p;
                }
                self.outbox.send(&ServerMessage::LlmOptionsUpdated);
            }
            ClientMessage::StagedTtsControl { action, config } => {
                self.staged_tts_control(&action, config);
            }
            ClientMessage::GetTtsInfo => {
                self.outbox.send(&ServerMessage::TtsInfo {
                    engines: self.app.registry.engines_info(),
                    current_engine: self.tts_engine.clone(),
                    current_voice: self.voice.clone(),
                });
            }
        }
        true
    }

    fn switch_tts_engine(&mut self, engine: String) {
        let normalized = engine.trim().to_lowercase();
        let valid = normalized == "auto" || voicehub_core::EngineKind::parse(&normalized).is_some();
        if !valid {
            self.outbox
                .error(ErrorKind::InvalidMessage, format!("unknown engine '{engine}'"));
            return;
        }
        self.tts_engine = normalized.clone();
        self.outbox
            .send(&ServerMessage::TtsEngineSwitched { engine: normalized });
    }

    fn set_tts_voice(&mut self, voice: String, engine: Option<String>) {
        if self.app.catalog.get(&voice).is_none() {
            self.outbox
                .error(ErrorKind::InvalidMessage, format!("unknown voice '{voice}'"));
            return;
        }
        self.voice = voice.clone();
        if let Some(engine) = engine {
            self.switch_tts_engine(engine);
        }
        self.outbox.send(&ServerMessage::TtsVoiceUpdated {
            voice,
            engine: self.tts_engine.clone(),
        });
    }

    fn staged_tts_control(&mut self, action: &str, config: Option<serde_json::Value>) {
        match action {
            "configure" => {
                if let Some(patch) = config {
                    self.app.staged.configure(&patch);
                }
                self.outbox.send(&ServerMessage::StagedTtsUpdated);
            }
            "toggle" => {
                let enabled = !self.app.staged.is_enabled();
                self.app.staged.set_enabled(enabled);
                self.outbox.send(&ServerMessage::StagedTtsUpdated);
            }
            "clear_cache" => {
                self.app.staged.clear_cache();
                self.outbox.send(&ServerMessage::StagedTtsUpdated);
            }
            "get_stats" => {
                self.outbox.send(&ServerMessage::StagedTtsStats {
                    stats: self.app.staged.stats_json(),
                });
            }
            other => {
                self.outbox.error(
                    ErrorKind::InvalidMessage,
                    format!("unknown staged_tts_control action '{other}'"),
                );
            }
        }
    }

    fn start_audio_stream(&mut self, stream_id: StreamId) {
        // At most one active stream per session: an unfinished stream is
        // force-completed before the next one opens.
        if let Some(previous) = self.active_stream.take() {
            if previous.is_active() {
                tracing::debug!(
                    session_id = %self.id,
                    previous = %previous.stream_id(),
                    "New stream while previous still active, force-completing"
                );
                previous.end();
            }
        }

        let stream = StreamIngest::spawn(
            stream_id.clone(),
            &self.app.config.audio,
            self.vad.clone(),
            self.app.ingest_stats.clone(),
            self.ingest_tx.clone(),
        );
        self.active_stream = Some(stream);
        metrics::record_stream_opened();
        self.outbox.send(&ServerMessage::AudioStreamStarted {
            stream_id: stream_id.to_string(),
        });
    }

    /// Push one decoded frame into the matching active stream. Frames for
    /// unknown streams are dropped and counted.
    pub fn push_frame(&mut self, stream_id: &StreamId, frame: AudioFrame) {
        let Some(stream) = &self.active_stream else {
            metrics::record_unknown_stream_frame();
            return;
        };
        if stream.stream_id() != stream_id || !stream.is_active() {
            metrics::record_unknown_stream_frame();
            return;
        }
        match stream.push_frame(frame) {
            PushOutcome::Accepted | PushOutcome::DroppedOldest | PushOutcome::OutOfOrder => {}
            PushOutcome::Ended => metrics::record_unknown_stream_frame(),
        }
    }

    fn end_audio_stream(&mut self, stream_id: &StreamId) {
        match &self.active_stream {
            Some(stream) if stream.stream_id() == stream_id => stream.end(),
            _ => {
                self.outbox.error(
                    ErrorKind::InvalidMessage,
                    format!("no active stream '{stream_id}'"),
                );
            }
        }
    }

    /// Binary end-of-stream sentinel (empty payload frame).
    pub fn end_active_stream_binary(&mut self, stream_id: &StreamId) {
        if let Some(stream) = &self.active_stream {
            if stream.stream_id() == stream_id {
                stream.end();
            }
        }
    }

    pub async fn handle_ingest_event(&mut self, event: IngestEvent) {
        let IngestEvent::StreamEnded {
            stream_id,
            reason,
            segment,
        } = event;

        if self
            .active_stream
            .as_ref()
            .map(|s| s.stream_id() == &stream_id)
            .unwrap_or(false)
        {
            self.active_stream = None;
        }
        metrics::record_stream_closed();

        self.outbox.send(&ServerMessage::AudioStreamEnded {
            stream_id: stream_id.to_string(),
            reason: reason.as_str().to_string(),
        });

        let Some(segment) = segment else {
            return;
        };

        // Transcription runs on the adapter's worker pool; the result comes
        // back through the internal channel.
        let stt = self.app.stt.clone();
        let internal = self.internal_tx.clone();
        let language = self.language.clone();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            match stt.transcribe(stream_id.clone(), segment, Some(language)).await {
                Ok(utterance) => {
                    metrics::record_stt_latency(started.elapsed());
                    let _ = internal.send(InternalEvent::Transcribed(utterance)).await;
                }
                Err(e) => {
                    tracing::warn!(stream_id = %stream_id, error = %e, "Transcription failed");
                    let _ = internal.send(InternalEvent::SttFailed { stream_id }).await;
                }
            }
        });
    }

    /// Handle an event from a session-owned background task. Returns
    /// `false` when the session should close.
    pub async fn handle_internal(&mut self, event: InternalEvent) -> bool {
        match event {
            InternalEvent::Transcribed(utterance) => {
                if utterance.is_empty() {
                    tracing::debug!(session_id = %self.id, "Empty transcript, nothing to route");
                    return true;
                }
                if self.features.interim_transcripts {
                    self.outbox.send(&ServerMessage::InterimTranscript {
                        stream_id: utterance.stream_id.to_string(),
                        text: utterance.text.clone(),
                    });
                }
                self.start_reply(utterance.text);
            }
            InternalEvent::SttFailed { stream_id } => {
                self.outbox.error(
                    ErrorKind::SttFailed,
                    format!("transcription failed for stream '{stream_id}'"),
                );
            }
            InternalEvent::ReplyFinished { user, assistant } => {
                self.history.push(ChatTurn {
                    user,
                    assistant,
                });
                // Bound the context we keep around.
                let max_turns = (self.llm.context_turns as usize).max(1) * 2;
                if self.history.len() > max_turns {
                    let excess = self.history.len() - max_turns;
                    self.history.drain(..excess);
                }
            }
            InternalEvent::LlmModels { models } => {
                self.outbox.send(&ServerMessage::LlmModels {
                    current: self.llm.model.clone(),
                    models,
                });
            }
            InternalEvent::PersistentBackpressure => {
                tracing::warn!(session_id = %self.id, "Persistent backpressure, closing session");
                self.outbox
                    .error(ErrorKind::Backpressure, "outbound queue persistently full");
                return false;
            }
        }
        true
    }

    /// Route the text and stream the spoken reply. A reply already in
    /// flight is cancelled first; its sequence still emits its end marker.
    pub fn start_reply(&mut self, text: String) {
        self.cancel_reply();

        let app = self.app.clone();
        let outbox = self.outbox.clone();
        let internal = self.internal_tx.clone();
        let llm = self.llm.clone();
        let history = self.history.clone();
        let language = self.language.clone();
        let voice = self.voice.clone();
        let engine = self.tts_engine.clone();
        let speed = self.speed;
        let volume = self.volume;
        let sequence_cancel: Arc<Mutex<Option<SequenceCancel>>> = Arc::new(Mutex::new(None));
        let cancel_slot = sequence_cancel.clone();

        let task = tokio::spawn(async move {
            let routed = app.router.route(&text, &language, &llm, &history).await;
            if routed.routing_failed {
                outbox.error(
                    ErrorKind::RoutingFailed,
                    "external routing failed, replying with echo",
                );
            }
            tracing::info!(intent = ?routed.intent, chars = routed.reply.len(), "Reply routed");

            outbox.send(&ServerMessage::Response {
                text: routed.reply.clone(),
            });

            // Staged synthesis: the configured engine override narrows both
            // tracks; "auto" keeps the staged split.
            let (intro_engine, main_engine) = if engine == "auto" {
                (
                    app.config.staged_tts.intro_engine.clone(),
                    app.config.staged_tts.main_engine.clone(),
                )
            } else {
                (engine.clone(), engine.clone())
            };

            let handle = app.staged.speak(SpeakRequest {
                text: routed.reply.clone(),
                language: language.clone(),
                voice,
                intro_engine,
                main_engine,
                params: voicehub_core::SynthesisParams { speed, volume },
            });
            *cancel_slot.lock() = Some(handle.canceller());

            forward_sequence(handle, &outbox).await;

            let _ = internal
                .send(InternalEvent::ReplyFinished {
                    user: text,
                    assistant: routed.reply,
                })
                .await;
        });

        self.reply = Some(ReplyInFlight {
            task,
            sequence_cancel,
        });
    }

    fn cancel_reply(&mut self) {
        if let Some(reply) = self.reply.take() {
            if let Some(cancel) = reply.sequence_cancel.lock().as_ref() {
                cancel.cancel();
            }
            reply.task.abort();
        }
    }

    /// Terminal cleanup: cancel outstanding work scoped to this session.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        if let Some(stream) = self.active_stream.take() {
            stream.abort();
        }
        self.cancel_reply();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forward one TTS sequence to the outbox, preserving index order. Audio
/// overflow degrades the sequence: it is cancelled early and the end marker
/// still goes out (the orchestrator emits it, we forward best-effort).
async fn forward_sequence(
    mut handle: voicehub_tts::SequenceHandle,
    outbox: &Outbox,
) {
    let started = std::time::Instant::now();
    let mut first_chunk = true;

    while let Some(event) = handle.events.recv().await {
        match event {
            TtsSequenceEvent::Chunk(chunk) => {
                let audio = chunk.samples.as_ref().map(|samples| {
                    let pcm = f32_to_pcm16(samples);
                    metrics::record_frame_out(pcm.len());
                    BASE64.encode(pcm)
                });
                metrics::record_tts_chunk(chunk.engine);
                if first_chunk {
                    metrics::record_tts_first_chunk_latency(chunk.engine, started.elapsed());
                    first_chunk = false;
                }
                if !chunk.success {
                    metrics::record_error(ErrorKind::TtsChunkFailed);
                }

                let msg = ServerMessage::TtsChunk {
                    sequence_id: chunk.sequence_id,
                    index: chunk.index,
                    total: chunk.total,
                    engine: chunk.engine,
                    text: chunk.text,
                    audio,
                    sample_rate: chunk.sample_rate,
                    success: chunk.success,
                };
                if outbox.send(&msg) == SendOutcome::AudioOverflow {
                    tracing::warn!(
                        sequence_id = %chunk.sequence_id,
                        "Outbound queue full on audio, degrading sequence"
                    );
                    outbox.error(ErrorKind::Backpressure, "audio delivery degraded");
                    handle.cancel();
                    // Keep draining so the end marker is still forwarded.
                }
            }
            TtsSequenceEvent::End { sequence_id } => {
                outbox.send(&ServerMessage::TtsSequenceEnd { sequence_id });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicehub_core::SequenceId;

    #[test]
    fn test_session_manager_capacity() {
        let manager = SessionManager::new(2);
        let a = manager.try_register().unwrap();
        let _b = manager.try_register().unwrap();
        assert!(manager.try_register().is_err());

        manager.unregister(&a);
        assert!(manager.try_register().is_ok());
        assert_eq!(manager.count(), 2);
    }

    #[tokio::test]
    async fn test_outbox_drops_telemetry_before_audio() {
        let (tx, mut rx) = mpsc::channel(1);
        let (internal_tx, _internal_rx) = mpsc::channel(8);
        let outbox = Outbox::new(tx, internal_tx);

        // Fill the single-slot queue.
        assert_eq!(
            outbox.send(&ServerMessage::Response {
                text: "voll".into()
            }),
            SendOutcome::Sent
        );

        // Telemetry overflow is silently dropped.
        assert_eq!(
            outbox.send(&ServerMessage::Response {
                text: "weg".into()
            }),
            SendOutcome::DroppedTelemetry
        );

        // Audio overflow is reported so the sequence can degrade.
        assert_eq!(
            outbox.send(&ServerMessage::TtsSequenceEnd {
                sequence_id: SequenceId::new()
            }),
            SendOutcome::AudioOverflow
        );

        // Draining makes room again.
        let _ = rx.recv().await.unwrap();
        assert_eq!(
            outbox.send(&ServerMessage::Response {
                text: "wieder".into()
            }),
            SendOutcome::Sent
        );
    }

    #[tokio::test]
    async fn test_outbox_signals_persistent_backpressure() {
        let (tx, _rx) = mpsc::channel(1);
        let (internal_tx, mut internal_rx) = mpsc::channel(8);
        let outbox = Outbox::new(tx, internal_tx);

        outbox.send(&ServerMessage::Response { text: "a".into() });
        for _ in 0..PERSISTENT_OVERFLOW_THRESHOLD + 1 {
            outbox.send(&ServerMessage::Response { text: "b".into() });
        }

        match internal_rx.try_recv() {
            Ok(InternalEvent::PersistentBackpressure) => {}
            other => panic!("expected backpressure signal, got {other:?}"),
        }
    }
}
