//! WebSocket transport
//!
//! Upgrades are authenticated before the handshake; after `ready` the reader
//! demultiplexes text frames (JSON v1) and binary frames (v2 audio ingress)
//! into the session, a writer task drains the bounded outbound queue, and a
//! ping timer closes the connection after two missed pongs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use voicehub_core::{
    AudioFrame, BinaryAudioFrame, ClientMessage, CloseCode, ErrorKind, Features, Hello,
    SampleRate, SessionId, StreamId,
};

use crate::auth::{authorize, Principal};
use crate::metrics;
use crate::session::{InternalEvent, Outbox, Session};
use crate::state::AppState;

/// Handshake must complete within this window
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the WebSocket router
pub fn ws_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// WebSocket upgrade handler: authenticate, then hand the socket to the
/// session driver. Failed auth upgrades anyway so the 4401 close code
/// reaches the client.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let token = params.get("token").cloned().or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
    });

    let principal = match authorize(&state.config.server, token.as_deref(), addr.ip()) {
        Ok(principal) => principal,
        Err(e) => {
            tracing::warn!(remote = %addr, error = %e, "Rejecting connection");
            metrics::record_error(ErrorKind::Unauthorized);
            return ws.on_upgrade(close_unauthorized);
        }
    };

    let session_id = match state.sessions.try_register() {
        Ok(id) => id,
        Err(_) => {
            tracing::warn!(remote = %addr, "Session capacity reached");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };
    metrics::record_session_opened();

    ws.on_upgrade(move |socket| async move {
        let cleanup_state = state.clone();
        // A panic anywhere in the session must not take down the process;
        // it terminates this session only.
        let driven = std::panic::AssertUnwindSafe(drive_connection(
            socket, state, session_id, principal,
        ))
        .catch_unwind()
        .await;
        if driven.is_err() {
            tracing::error!(session_id = %session_id, "Session panicked, terminated");
            metrics::record_error(ErrorKind::Internal);
        }
        cleanup_state.sessions.unregister(&session_id);
        metrics::record_session_closed();
        tracing::info!(session_id = %session_id, "Session closed");
    })
}

async fn close_unauthorized(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::UNAUTHORIZED,
            reason: "unauthorized".into(),
        })))
        .await;
}

async fn drive_connection(
    socket: WebSocket,
    state: AppState,
    session_id: SessionId,
    principal: Principal,
) {
    let (mut sink, mut stream) = socket.split();

    let Some(hello) = await_hello(&mut stream).await else {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::SERVER_ERROR,
                reason: "handshake expected".into(),
            })))
            .await;
        return;
    };

    let server_features = Features {
        binary_audio: state.config.features.binary_audio,
        interim_transcripts: state.config.features.interim_transcripts,
        vad: state.config.features.vad,
    };
    let features = hello.capabilities.intersect(&server_features);

    let ready = serde_json::json!({ "op": "ready", "features": features });
    if sink.send(Message::Text(ready.to_string())).await.is_err() {
        return;
    }
    tracing::info!(
        session_id = %session_id,
        device = hello.device.as_deref().unwrap_or("unknown"),
        version = hello.version.as_deref().unwrap_or("-"),
        ?features,
        "Handshake complete"
    );

    let (out_tx, out_rx) = mpsc::channel::<Message>(state.config.server.outbound_queue);
    let (internal_tx, mut internal_rx) = mpsc::channel::<InternalEvent>(64);
    let (ingest_tx, mut ingest_rx) = mpsc::channel(16);
    let outbox = Outbox::new(out_tx, internal_tx.clone());

    let writer = tokio::spawn(run_writer(sink, out_rx));

    let mut session = Session::new(
        session_id,
        principal,
        features,
        state.clone(),
        outbox.clone(),
        internal_tx,
        ingest_tx,
    );

    let ping_interval = Duration::from_secs(state.config.server.ping_interval_secs.max(1));
    let mut ping_timer = tokio::time::interval(ping_interval);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so the unanswered-ping
    // counter starts at a full interval.
    ping_timer.tick().await;
    let mut pings_unanswered: u32 = 0;

    let close_frame = loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_text(&mut session, &outbox, &text).await {
                            break normal_close();
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        handle_binary(&mut session, &outbox, &bytes);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pings_unanswered = 0;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        outbox.send_raw(Message::Pong(payload));
                    }
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session.id, error = %e, "Socket error");
                        break None;
                    }
                }
            }
            Some(event) = ingest_rx.recv() => {
                session.handle_ingest_event(event).await;
            }
            Some(event) = internal_rx.recv() => {
                if !session.handle_internal(event).await {
                    break normal_close();
                }
            }
            _ = ping_timer.tick() => {
                if pings_unanswered >= 2 {
                    tracing::warn!(session_id = %session.id, "Two pongs missed, closing");
                    break Some(CloseFrame {
                        code: CloseCode::SERVER_ERROR,
                        reason: "ping timeout".into(),
                    });
                }
                outbox.send_raw(Message::Ping(Vec::new()));
                pings_unanswered += 1;
            }
        }
    };

    session.shutdown();
    let frame = close_frame.unwrap_or_else(|| CloseFrame {
        code: CloseCode::NORMAL,
        reason: "".into(),
    });
    outbox.send_raw(Message::Close(Some(frame)));
    drop(session);
    drop(outbox);
    let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;
}

fn normal_close() -> Option<CloseFrame<'static>> {
    Some(CloseFrame {
        code: CloseCode::NORMAL,
        reason: "".into(),
    })
}

async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Message>,
) {
    while let Some(frame) = out_rx.recv().await {
        let is_close = matches!(frame, Message::Close(_));
        if sink.send(frame).await.is_err() {
            break;
        }
        if is_close {
            break;
        }
    }
}

/// Wait for the handshake message. Anything else, or silence past the
/// deadline, aborts the connection.
async fn await_hello(stream: &mut SplitStream<WebSocket>) -> Option<Hello> {
    let result = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
                    return Hello::parse(&value);
                }
                Message::Close(_) => return None,
                // Control frames before the handshake are tolerated.
                _ => continue,
            }
        }
        None
    })
    .await;

    result.ok().flatten()
}

async fn handle_text(session: &mut Session, outbox: &Outbox, text: &str) -> bool {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => session.handle_client_message(msg).await,
        Err(_) => {
            // An `{op:"hello"}` repeat has no `type` tag and lands here.
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
                if Hello::parse(&value).is_some() {
                    outbox.error(ErrorKind::InvalidMessage, "session already established");
                    return true;
                }
            }
            outbox.error(ErrorKind::InvalidMessage, "unrecognized message");
            true
        }
    }
}

fn handle_binary(session: &mut Session, outbox: &Outbox, bytes: &[u8]) {
    if !session.features.binary_audio {
        // Binary ingress was not negotiated: ignore and count.
        metrics::record_binary_rejected();
        return;
    }

    match BinaryAudioFrame::decode(bytes) {
        Ok(frame) => {
            let stream_id = StreamId::from(frame.stream_id.as_str());
            if frame.is_end_sentinel() {
                session.end_active_stream_binary(&stream_id);
                return;
            }
            metrics::record_frame_in(frame.payload.len());
            let audio = AudioFrame::from_pcm16(
                &frame.payload,
                SampleRate::Hz16000,
                frame.sequence,
                frame.timestamp_ms,
            );
            session.push_frame(&stream_id, audio);
        }
        Err(e) => {
            outbox.error(ErrorKind::InvalidMessage, format!("bad binary frame: {e}"));
        }
    }
}
