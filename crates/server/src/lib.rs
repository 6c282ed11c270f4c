//! Voicehub server
//!
//! WebSocket transport, per-session state machines, and the metrics/health
//! HTTP endpoint for the realtime voice-assistant backend.

pub mod auth;
pub mod http;
pub mod metrics;
pub mod session;
pub mod state;
pub mod websocket;

pub use auth::{authorize, AuthError, Principal};
pub use http::metrics_router;
pub use metrics::{
    init_metrics, record_error, record_frame_in, record_session_closed, record_session_opened,
    record_stt_latency, record_tts_chunk,
};
pub use session::{Session, SessionManager};
pub use state::AppState;
pub use websocket::ws_handler;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session error: {0}")]
    Session(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("too many sessions")]
    Capacity,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}
