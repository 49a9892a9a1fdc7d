//! The reconnect loop: connect, pump wire frames in both directions,
//! reconnect with capped exponential backoff on any drop. Shaped after
//! the retrieval pack's relay-client reconnect loop for this exact
//! domain (`connect_async`, split sink/stream, `tokio::select!` over
//! inbound/outbound) — spec §5 pins the backoff schedule to "base 1s,
//! cap 5s".

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use termcast_protocol::{ConnectionRole, ProducerInbound, ProducerOutbound};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

pub struct ConnectParams {
    pub server: String,
    pub role: ConnectionRole,
    pub session_id: Option<String>,
    pub public_key: Option<String>,
    pub nickname: Option<String>,
    pub user_secret: Option<String>,
}

impl ConnectParams {
    fn url(&self) -> String {
        let role = match self.role {
            ConnectionRole::Producer => "producer",
            ConnectionRole::Daemon => "daemon",
            ConnectionRole::Viewer => "viewer",
        };
        let mut query = format!("role={role}");
        if let Some(v) = &self.session_id {
            query.push_str(&format!("&sessionId={}", percent_encode(v)));
        }
        if let Some(v) = &self.public_key {
            query.push_str(&format!("&publicKey={}", percent_encode(v)));
        }
        if let Some(v) = &self.nickname {
            query.push_str(&format!("&nickname={}", percent_encode(v)));
        }
        if let Some(v) = &self.user_secret {
            query.push_str(&format!("&userSecret={}", percent_encode(v)));
        }
        format!("{}/ws?{query}", self.server.trim_end_matches('/'))
    }
}

/// Minimal query-value escaping: base64url payloads and plain identifiers
/// never need more than this, and pulling in a full URL-encoding crate
/// for three reserved characters would be overkill.
fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Runs forever, reconnecting on any transport failure. `from_app` carries
/// every wire message this process wants to send to the relay; `to_app`
/// delivers every relay->producer message back to the caller. `on_connect`
/// fires after each successful handshake (including reconnects) so the
/// caller can re-announce daemon sessions; it receives nothing and is
/// infallible by design — re-announcement failures surface as ordinary
/// send errors on the next pump iteration.
pub async fn run(
    params: ConnectParams,
    mut from_app: mpsc::UnboundedReceiver<ProducerInbound>,
    to_app: mpsc::UnboundedSender<ProducerOutbound>,
    mut on_connect: impl FnMut() + Send,
) {
    let mut backoff = BACKOFF_BASE;
    loop {
        match connect_async(params.url()).await {
            Ok((stream, _)) => {
                info!(server = %params.server, "connected to relay");
                backoff = BACKOFF_BASE;
                on_connect();

                let (mut sink, mut stream) = stream.split();
                loop {
                    tokio::select! {
                        incoming = stream.next() => {
                            match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str::<ProducerOutbound>(&text) {
                                        Ok(msg) => {
                                            if to_app.send(msg).is_err() {
                                                return;
                                            }
                                        }
                                        Err(err) => warn!(%err, "malformed frame from relay"),
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(err)) => {
                                    warn!(%err, "relay connection error");
                                    break;
                                }
                            }
                        }
                        outgoing = from_app.recv() => {
                            match outgoing {
                                Some(msg) => {
                                    let text = serde_json::to_string(&msg).expect("wire messages always serialize");
                                    if sink.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                None => return,
                            }
                        }
                    }
                }
            }
            Err(err) => warn!(%err, server = %params.server, "connect failed"),
        }

        warn!(delay = ?backoff, "reconnecting");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}
