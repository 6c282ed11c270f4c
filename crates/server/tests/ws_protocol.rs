//! End-to-end protocol tests against a real listener
//!
//! Each test boots the full state (stub STT backend, tone engines) on an
//! ephemeral port and speaks the v1/v2 protocol through tokio-tungstenite.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use voicehub_config::Settings;
use voicehub_core::BinaryAudioFrame;
use voicehub_server::{websocket::ws_router, AppState};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.server.token = Some("test-token".to_string());
    settings.server.jwt_secret = None;
    settings.server.jwt_public_key = None;
    settings.server.allowed_ips = Vec::new();
    settings.audio.vad_enabled = false;
    settings
}

async fn spawn_server(settings: Settings) -> SocketAddr {
    let state = AppState::new(settings).unwrap();
    state.mark_accepting();
    let app = ws_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, token: &str) -> WsClient {
    let url = format!("ws://{addr}/ws?token={token}");
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Receive the next JSON text message, skipping protocol control frames.
async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
            .expect("socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn handshake(ws: &mut WsClient, capabilities: serde_json::Value) -> serde_json::Value {
    ws.send(Message::Text(
        serde_json::json!({
            "op": "hello",
            "version": 2,
            "device": "integration-test",
            "capabilities": capabilities,
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let ready = recv_json(ws).await;
    assert_eq!(ready["op"], "ready");
    ready
}

#[tokio::test]
async fn unauthorized_connection_closes_with_4401() {
    let addr = spawn_server(test_settings()).await;
    let mut ws = connect(addr, "wrong-token").await;

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4401);
            assert_eq!(frame.reason, "unauthorized");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn text_input_produces_response_and_ordered_sequence() {
    let addr = spawn_server(test_settings()).await;
    let mut ws = connect(addr, "test-token").await;
    handshake(&mut ws, serde_json::json!({"binary_audio": false})).await;

    // Long enough to split into an intro and several main chunks.
    let long_text =
        "Bitte wiederhole diesen ausgesprochen langen Satz mit vielen Woertern. ".repeat(6);
    ws.send(Message::Text(
        serde_json::json!({"type": "text", "content": long_text}).to_string(),
    ))
    .await
    .unwrap();

    let response = recv_json(&mut ws).await;
    assert_eq!(response["type"], "response");
    assert!(!response["text"].as_str().unwrap().is_empty());

    let mut indices = Vec::new();
    let mut sequence_ids = std::collections::HashSet::new();
    let mut ends = 0;
    loop {
        let msg = recv_json(&mut ws).await;
        match msg["type"].as_str().unwrap() {
            "tts_chunk" => {
                assert_eq!(msg["success"], true);
                assert!(msg["audio"].is_string());
                indices.push(msg["index"].as_u64().unwrap());
                sequence_ids.insert(msg["sequence_id"].as_str().unwrap().to_string());
            }
            "tts_sequence_end" => {
                ends += 1;
                break;
            }
            other => panic!("unexpected message type {other}"),
        }
    }

    assert_eq!(ends, 1);
    assert_eq!(sequence_ids.len(), 1);
    assert!(indices.len() >= 2, "expected staged chunks, got {indices:?}");
    let expected: Vec<u64> = (0..indices.len() as u64).collect();
    assert_eq!(indices, expected, "chunks must arrive strictly in order");
}

#[tokio::test]
async fn time_skill_short_circuits() {
    let addr = spawn_server(test_settings()).await;
    let mut ws = connect(addr, "test-token").await;
    handshake(&mut ws, serde_json::json!({})).await;

    ws.send(Message::Text(
        serde_json::json!({"type": "text", "content": "Wie spät ist es?"}).to_string(),
    ))
    .await
    .unwrap();

    let response = recv_json(&mut ws).await;
    assert_eq!(response["type"], "response");
    let text = response["text"].as_str().unwrap();
    assert!(
        text.starts_with("Es ist ") && text.ends_with(" Uhr."),
        "unexpected reply: {text}"
    );
}

#[tokio::test]
async fn second_hello_is_invalid_but_not_fatal() {
    let addr = spawn_server(test_settings()).await;
    let mut ws = connect(addr, "test-token").await;
    handshake(&mut ws, serde_json::json!({})).await;

    ws.send(Message::Text(
        serde_json::json!({"op": "hello", "version": 2, "capabilities": {}}).to_string(),
    ))
    .await
    .unwrap();

    let error = recv_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["kind"], "invalid_message");

    // Session state is intact: a ping still answers.
    ws.send(Message::Text(
        serde_json::json!({"type": "ping", "timestamp": 7}).to_string(),
    ))
    .await
    .unwrap();
    let pong = recv_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["timestamp"], 7);
}

fn binary_frame(stream_id: &str, sequence: u32, payload: Vec<u8>) -> Message {
    Message::Binary(
        BinaryAudioFrame {
            stream_id: stream_id.to_string(),
            sequence,
            timestamp_ms: sequence as u64 * 20,
            payload,
        }
        .encode(),
    )
}

#[tokio::test]
async fn binary_audio_requires_negotiation() {
    let addr = spawn_server(test_settings()).await;

    // Opt-in: feature negotiated, binary frames drive the stream.
    let mut ws = connect(addr, "test-token").await;
    let ready = handshake(&mut ws, serde_json::json!({"binary_audio": true})).await;
    assert_eq!(ready["features"]["binary_audio"], true);

    ws.send(Message::Text(
        serde_json::json!({"type": "start_audio_stream", "stream_id": "mic-1"}).to_string(),
    ))
    .await
    .unwrap();
    let started = recv_json(&mut ws).await;
    assert_eq!(started["type"], "audio_stream_started");

    let pcm: Vec<u8> = vec![0x10; 640];
    for seq in 0..5u32 {
        ws.send(binary_frame("mic-1", seq, pcm.clone())).await.unwrap();
    }
    // Empty payload is the end-of-stream sentinel.
    ws.send(binary_frame("mic-1", 5, Vec::new())).await.unwrap();

    let ended = recv_json(&mut ws).await;
    assert_eq!(ended["type"], "audio_stream_ended");
    assert_eq!(ended["stream_id"], "mic-1");
    assert_eq!(ended["reason"], "completed");
}

#[tokio::test]
async fn binary_audio_ignored_without_negotiation() {
    let mut settings = test_settings();
    settings.features.binary_audio = false;
    let addr = spawn_server(settings).await;

    let mut ws = connect(addr, "test-token").await;
    let ready = handshake(&mut ws, serde_json::json!({"binary_audio": true})).await;
    assert_eq!(ready["features"]["binary_audio"], false);

    // Binary frames are dropped silently; the session stays healthy.
    ws.send(binary_frame("mic-1", 0, vec![0u8; 64])).await.unwrap();
    ws.send(Message::Text(
        serde_json::json!({"type": "ping", "timestamp": 1}).to_string(),
    ))
    .await
    .unwrap();
    let pong = recv_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
async fn json_audio_chunks_reach_the_stream() {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    let addr = spawn_server(test_settings()).await;
    let mut ws = connect(addr, "test-token").await;
    handshake(&mut ws, serde_json::json!({})).await;

    ws.send(Message::Text(
        serde_json::json!({"type": "start_audio_stream", "stream_id": "mic-2"}).to_string(),
    ))
    .await
    .unwrap();
    assert_eq!(recv_json(&mut ws).await["type"], "audio_stream_started");

    let chunk = BASE64.encode(vec![0x20u8; 320]);
    for seq in 0..3u32 {
        ws.send(Message::Text(
            serde_json::json!({
                "type": "audio_chunk",
                "stream_id": "mic-2",
                "chunk": chunk,
                "sequence": seq,
                "timestamp": seq * 20,
            })
            .to_string(),
        ))
        .await
        .unwrap();
    }
    ws.send(Message::Text(
        serde_json::json!({"type": "end_audio_stream", "stream_id": "mic-2"}).to_string(),
    ))
    .await
    .unwrap();

    let ended = recv_json(&mut ws).await;
    assert_eq!(ended["type"], "audio_stream_ended");
    assert_eq!(ended["reason"], "completed");
}

#[tokio::test]
async fn staged_tts_control_round_trip() {
    let addr = spawn_server(test_settings()).await;
    let mut ws = connect(addr, "test-token").await;
    handshake(&mut ws, serde_json::json!({})).await;

    ws.send(Message::Text(
        serde_json::json!({"type": "staged_tts_control", "action": "get_stats"}).to_string(),
    ))
    .await
    .unwrap();
    let stats = recv_json(&mut ws).await;
    assert_eq!(stats["type"], "staged_tts_stats");
    assert!(stats["stats"]["cache"].is_object());

    ws.send(Message::Text(
        serde_json::json!({"type": "staged_tts_control", "action": "clear_cache"}).to_string(),
    ))
    .await
    .unwrap();
    assert_eq!(recv_json(&mut ws).await["type"], "staged_tts_updated");

    ws.send(Message::Text(
        serde_json::json!({"type": "staged_tts_control", "action": "explode"}).to_string(),
    ))
    .await
    .unwrap();
    let error = recv_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["kind"], "invalid_message");
}

#[tokio::test]
async fn tts_info_lists_engines() {
    let addr = spawn_server(test_settings()).await;
    let mut ws = connect(addr, "test-token").await;
    handshake(&mut ws, serde_json::json!({})).await;

    ws.send(Message::Text(
        serde_json::json!({"type": "get_tts_info"}).to_string(),
    ))
    .await
    .unwrap();
    let info = recv_json(&mut ws).await;
    assert_eq!(info["type"], "tts_info");
    let engines = info["engines"].as_array().unwrap();
    assert_eq!(engines.len(), 3);
    // Without model files on disk the file-backed engine reports
    // unavailable while the speaker-id engines stay usable.
    let piper = engines
        .iter()
        .find(|e| e["engine"] == "piper")
        .unwrap();
    assert_eq!(piper["available"], false);
}
