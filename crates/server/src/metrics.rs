//! Prometheus metrics
//!
//! Counters and histograms are recorded at the call sites via the
//! `metrics` facade; slow-moving values (queue depths, drop counters held
//! in the pipeline) are refreshed as gauges at scrape time.

use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use voicehub_core::{EngineKind, ErrorKind};

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Idempotent; the first call wins.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// Handle for rendering, if metrics were initialized
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS.get().cloned()
}

pub fn record_session_opened() {
    metrics::counter!("voicehub_sessions_opened_total").increment(1);
    metrics::gauge!("voicehub_sessions_active").increment(1.0);
}

pub fn record_session_closed() {
    metrics::gauge!("voicehub_sessions_active").decrement(1.0);
}

pub fn record_stream_opened() {
    metrics::counter!("voicehub_streams_opened_total").increment(1);
    metrics::gauge!("voicehub_streams_active").increment(1.0);
}

pub fn record_stream_closed() {
    metrics::gauge!("voicehub_streams_active").decrement(1.0);
}

pub fn record_frame_in(bytes: usize) {
    metrics::counter!("voicehub_frames_in_total").increment(1);
    metrics::counter!("voicehub_audio_bytes_in_total").increment(bytes as u64);
}

pub fn record_frame_out(bytes: usize) {
    metrics::counter!("voicehub_frames_out_total").increment(1);
    metrics::counter!("voicehub_audio_bytes_out_total").increment(bytes as u64);
}

pub fn record_stt_latency(elapsed: Duration) {
    metrics::histogram!("voicehub_stt_latency_seconds").record(elapsed.as_secs_f64());
}

pub fn record_tts_chunk(engine: EngineKind) {
    metrics::counter!("voicehub_tts_chunks_total", "engine" => engine.as_str()).increment(1);
}

/// Time from sequence start to the first audible chunk, per engine
pub fn record_tts_first_chunk_latency(engine: EngineKind, elapsed: Duration) {
    metrics::histogram!("voicehub_tts_first_chunk_seconds", "engine" => engine.as_str())
        .record(elapsed.as_secs_f64());
}

pub fn record_unknown_stream_frame() {
    metrics::counter!("voicehub_frames_unknown_stream_total").increment(1);
}

/// Binary frame received without the negotiated capability
pub fn record_binary_rejected() {
    metrics::counter!("voicehub_binary_frames_rejected_total").increment(1);
}

pub fn record_fallback() {
    metrics::counter!("voicehub_tts_fallback_total").increment(1);
}

pub fn record_error(kind: ErrorKind) {
    let label = match kind {
        ErrorKind::Unauthorized => "unauthorized",
        ErrorKind::InvalidMessage => "invalid_message",
        ErrorKind::StreamOverflow => "stream_overflow",
        ErrorKind::SttFailed => "stt_failed",
        ErrorKind::RoutingFailed => "routing_failed",
        ErrorKind::TtsEngineUnavailable => "tts_engine_unavailable",
        ErrorKind::TtsChunkFailed => "tts_chunk_failed",
        ErrorKind::Backpressure => "backpressure",
        ErrorKind::Internal => "internal",
    };
    metrics::counter!("voicehub_errors_total", "kind" => label).increment(1);
}

pub fn record_dropped_telemetry() {
    metrics::counter!("voicehub_dropped_telemetry_total").increment(1);
}

/// Refresh gauges mirroring pipeline-held counters; called at scrape time.
pub fn refresh_pipeline_gauges(state: &crate::AppState) {
    use std::sync::atomic::Ordering;

    let ingest = &state.ingest_stats;
    metrics::gauge!("voicehub_frames_dropped")
        .set(ingest.frames_dropped.load(Ordering::Relaxed) as f64);
    metrics::gauge!("voicehub_frames_out_of_order")
        .set(ingest.frames_out_of_order.load(Ordering::Relaxed) as f64);

    let staged = state.staged.stats();
    metrics::gauge!("voicehub_tts_fallback_count")
        .set(staged.fallback_count.load(Ordering::Relaxed) as f64);
    metrics::gauge!("voicehub_tts_chunks_failed")
        .set(staged.chunks_failed.load(Ordering::Relaxed) as f64);

    let cache = state.staged.stats_json();
    if let Some(ratio) = cache
        .get("cache")
        .and_then(|c| c.get("hit_ratio"))
        .and_then(|v| v.as_f64())
    {
        metrics::gauge!("voicehub_tts_cache_hit_ratio").set(ratio);
    }

    metrics::gauge!("voicehub_sessions_active_snapshot").set(state.sessions.count() as f64);
}
