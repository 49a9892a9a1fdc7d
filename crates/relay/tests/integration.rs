//! End-to-end scenarios from spec §8 driven against a real bound relay —
//! WebSocket traffic needs an actual TCP listener (the upgrade handshake
//! doesn't work over `tower::ServiceExt::oneshot`), so these tests spawn
//! the full axum app on `127.0.0.1:0` and drive it with `tokio-tungstenite`
//! clients, the same stack the producer binary uses against a real relay.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use termcast_crypto::KeyPair;
use termcast_relay::{build_router, state::AppState};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState::new());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    // Give the accept loop a tick to start polling.
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{addr}/ws?{query}");
    let (stream, _) = connect_async(&url).await.expect("connect");
    stream
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

async fn recv_json(client: &mut Client) -> Value {
    loop {
        match client.next().await.expect("stream ended").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn recv_json_timeout(client: &mut Client) -> Option<Value> {
    tokio::time::timeout(Duration::from_millis(500), recv_json(client)).await.ok()
}

#[tokio::test]
async fn encrypted_happy_path() {
    let addr = spawn_relay().await;
    let producer_keys = KeyPair::generate();
    let mut producer = connect(
        addr,
        &format!("role=producer&sessionId=demo&publicKey={}", producer_keys.public_key_base64()),
    )
    .await;

    let viewer_keys = KeyPair::generate();
    let mut viewer = connect(
        addr,
        &format!("role=viewer&sessionId=demo&publicKey={}", viewer_keys.public_key_base64()),
    )
    .await;

    let status = recv_json(&mut viewer).await;
    assert_eq!(status["event"], "cli-status");
    assert_eq!(status["connected"], true);
    assert_eq!(status["encrypted"], true);

    let joined = recv_json(&mut producer).await;
    assert_eq!(joined["event"], "viewer-joined");
    let viewer_id = joined["viewerId"].as_str().unwrap().to_string();
    let viewer_public_key = joined["publicKey"].as_str().unwrap();
    let shared = producer_keys.derive_shared(viewer_public_key).unwrap();

    let envelope = shared.encrypt(b"hello\n").unwrap();
    send_json(
        &mut producer,
        json!({"event":"encrypted-output","viewerId":viewer_id,"encrypted":envelope,"seq":1,"timestamp":1}),
    )
    .await;

    let frame = recv_json(&mut viewer).await;
    assert_eq!(frame["event"], "encrypted-output");
    assert_eq!(frame["seq"], 1);

    let envelope2 = shared.encrypt(b"world\n").unwrap();
    send_json(
        &mut producer,
        json!({"event":"encrypted-output","viewerId":viewer_id,"encrypted":envelope2,"seq":2,"timestamp":2}),
    )
    .await;
    let frame2 = recv_json(&mut viewer).await;
    assert_eq!(frame2["seq"], 2);
}

#[tokio::test]
async fn unencrypted_late_join_gets_last_output() {
    let addr = spawn_relay().await;
    let mut producer = connect(addr, "role=producer&sessionId=demo2").await;
    // producer never sees a cli-status of its own; drive straight to output.
    send_json(&mut producer, json!({"event":"output","seq":1,"content":"a","timestamp":1})).await;
    send_json(&mut producer, json!({"event":"output","seq":2,"content":"b","timestamp":2})).await;

    // give the relay a moment to apply both before the viewer joins.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut viewer = connect(addr, "role=viewer&sessionId=demo2").await;
    let status = recv_json(&mut viewer).await;
    assert_eq!(status["event"], "cli-status");
    let output = recv_json(&mut viewer).await;
    assert_eq!(output["event"], "output");
    assert_eq!(output["seq"], 2);
    assert_eq!(output["content"], "b");
}

#[tokio::test]
async fn control_arbitration() {
    let addr = spawn_relay().await;
    let mut producer = connect(addr, "role=producer&sessionId=ctl").await;
    let mut a = connect(addr, "role=viewer&sessionId=ctl").await;
    let mut b = connect(addr, "role=viewer&sessionId=ctl").await;
    recv_json(&mut a).await; // cli-status
    recv_json(&mut b).await; // cli-status

    send_json(&mut a, json!({"event":"request-control"})).await;
    let grant_a = recv_json(&mut a).await;
    assert_eq!(grant_a["event"], "control-status");
    assert_eq!(grant_a["locked"], true);
    let _grant_b_view = recv_json(&mut b).await; // broadcast of the same grant

    send_json(&mut b, json!({"event":"request-control"})).await;
    let denial = recv_json(&mut b).await;
    assert_eq!(denial["event"], "control-denied");

    send_json(&mut b, json!({"event":"input","keys":"x","type":"text"})).await;
    let rejected = recv_json(&mut b).await;
    assert_eq!(rejected["event"], "input-rejected");
    assert!(recv_json_timeout(&mut producer).await.is_none());
}

#[tokio::test]
async fn producer_crash_notifies_viewers_and_rejects_input() {
    let addr = spawn_relay().await;
    let producer = connect(addr, "role=producer&sessionId=crash").await;
    let mut viewer = connect(addr, "role=viewer&sessionId=crash").await;
    let status = recv_json(&mut viewer).await;
    assert_eq!(status["connected"], true);

    drop(producer);

    let disconnect_status = recv_json(&mut viewer).await;
    assert_eq!(disconnect_status["event"], "cli-status");
    assert_eq!(disconnect_status["connected"], false);

    send_json(&mut viewer, json!({"event":"input","keys":"x","type":"text"})).await;
    let error = recv_json(&mut viewer).await;
    assert_eq!(error["event"], "error");
    assert_eq!(error["message"], "CLI not connected");
}

#[tokio::test]
async fn daemon_rpc_round_trips_through_http() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState::new());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut daemon = connect(addr, "role=daemon").await;

    let client = reqwest_like_post(
        addr,
        "/api/daemon/command",
        json!({"command":"create-session","params":{"name":"x"}}),
    );
    let http_task = tokio::spawn(client);

    let command = recv_json(&mut daemon).await;
    assert_eq!(command["event"], "cli-command");
    assert_eq!(command["command"], "create-session");
    let command_id = command["commandId"].as_str().unwrap().to_string();

    send_json(
        &mut daemon,
        json!({"event":"cli-response","commandId":command_id,"success":true,"data":{"name":"x"}}),
    )
    .await;

    let response = http_task.await.unwrap();
    assert_eq!(response["success"], true);
    assert_eq!(response["data"]["name"], "x");
}

#[tokio::test]
async fn daemon_rpc_without_daemon_reports_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState::new());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let response = reqwest_like_post(addr, "/api/daemon/command", json!({"command":"list-sessions"})).await;
    assert_eq!(response["error"], "No CLI daemon connected");
}

/// Minimal hand-rolled HTTP/1.1 client so the test suite doesn't need a
/// full HTTP client dependency just to hit three JSON endpoints.
async fn reqwest_like_post(addr: SocketAddr, path: &str, body: Value) -> Value {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let payload = body.to_string();
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8_lossy(&raw);
    let body_start = text.find("\r\n\r\n").map(|i| i + 4).unwrap_or(0);
    serde_json::from_str(text[body_start..].trim()).unwrap()
}
