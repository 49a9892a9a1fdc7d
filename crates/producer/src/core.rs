//! The session controller shared by the single-session CLI and the daemon
//! (spec §9 design note: "event-channel-based producer core ... the
//! single-session and daemon flavors differ only in the channel
//! consumer"). One `ProducerCore` owns exactly one session incarnation:
//! its own long-term key pair, its cached per-viewer shared secrets, and
//! the capture loop driving it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use termcast_crypto::{KeyPair, SharedSecret};
use termcast_protocol::{InputPayload, OutputEvent, ProducerInbound, ProducerOutbound, ViewerId};

use crate::capture::PaneCapture;
use crate::now_ms;

/// Runs one session's capture loop plus inbound relay-message handling
/// until its inbound channel closes (the caller drops the sender to stop
/// it, e.g. on `detach-session` or process shutdown).
pub struct ProducerCore<C: PaneCapture> {
    capture: C,
    poll_interval: Duration,
    keypair: KeyPair,
    secrets: HashMap<ViewerId, SharedSecret>,
    seq: u64,
    last_frame: Option<OutputEvent>,
    last_snapshot: Option<Vec<u8>>,
    viewer_count: Arc<AtomicUsize>,
    /// Daemon sessions are always encrypted; a single-session producer may
    /// opt out with `--unencrypted`, in which case frames publish as plain
    /// `output` and no per-viewer secret cache is used.
    encrypted: bool,
}

impl<C: PaneCapture> ProducerCore<C> {
    pub fn new(capture: C, poll_interval: Duration) -> Self {
        ProducerCore {
            capture,
            poll_interval,
            keypair: KeyPair::generate(),
            secrets: HashMap::new(),
            seq: 0,
            last_frame: None,
            last_snapshot: None,
            viewer_count: Arc::new(AtomicUsize::new(0)),
            encrypted: true,
        }
    }

    pub fn unencrypted(mut self) -> Self {
        self.encrypted = false;
        self
    }

    pub fn public_key_base64(&self) -> String {
        self.keypair.public_key_base64()
    }

    /// Shared with the daemon RPC dispatcher so `list-sessions` can report
    /// a live viewer count without reaching into this task's private state.
    pub fn viewer_count_handle(&self) -> Arc<AtomicUsize> {
        self.viewer_count.clone()
    }

    /// Drives the capture poll and inbound relay messages until `inbound`
    /// closes. `outbound` carries every wire message this session emits
    /// (`output`/`encrypted-output`/`output-history`); for daemon-attached
    /// sessions the caller tags `session_id` on relay messages it builds
    /// from these, this core stays session-agnostic on the wire.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<ProducerOutbound>,
        outbound: mpsc::UnboundedSender<ProducerInbound>,
    ) {
        // spec §4.2: "The initial snapshot on start is always emitted as
        // seq=1 unconditionally if non-empty."
        match self.capture.capture().await {
            Ok(snapshot) if !snapshot.is_empty() => self.emit_frame(snapshot, &outbound),
            Ok(_) => {}
            Err(err) => warn!(%err, "initial pane capture failed"),
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.capture.capture().await {
                        Ok(snapshot) => {
                            if self.last_snapshot.as_deref() != Some(snapshot.as_slice()) {
                                self.emit_frame(snapshot, &outbound);
                            }
                        }
                        Err(err) => warn!(%err, "pane capture failed"),
                    }
                }
                msg = inbound.recv() => {
                    match msg {
                        Some(msg) => self.handle_inbound(msg, &outbound).await,
                        None => break,
                    }
                }
            }
        }
    }

    fn emit_frame(&mut self, snapshot: Vec<u8>, outbound: &mpsc::UnboundedSender<ProducerInbound>) {
        self.seq += 1;
        let event = OutputEvent {
            seq: self.seq,
            content: String::from_utf8_lossy(&snapshot).into_owned(),
            timestamp: now_ms(),
        };
        self.last_snapshot = Some(snapshot);
        self.publish(&event, outbound);
        self.last_frame = Some(event);
    }

    fn publish(&self, event: &OutputEvent, outbound: &mpsc::UnboundedSender<ProducerInbound>) {
        if !self.encrypted {
            let _ = outbound.send(ProducerInbound::Output {
                seq: event.seq,
                content: event.content.clone(),
                timestamp: event.timestamp,
            });
            return;
        }
        for (viewer_id, secret) in &self.secrets {
            match secret.encrypt_json(event) {
                Ok(encrypted) => {
                    let _ = outbound.send(ProducerInbound::EncryptedOutput {
                        viewer_id: viewer_id.clone(),
                        encrypted,
                        seq: event.seq,
                        timestamp: event.timestamp,
                    });
                }
                Err(err) => warn!(%err, "failed to encrypt frame for viewer"),
            }
        }
    }

    async fn handle_inbound(&mut self, msg: ProducerOutbound, outbound: &mpsc::UnboundedSender<ProducerInbound>) {
        match msg {
            ProducerOutbound::ViewerJoined { viewer_id, public_key, .. } => {
                match self.keypair.derive_shared(&public_key) {
                    Ok(secret) => {
                        // spec §4.2: "the controller immediately encrypts the
                        // cached last frame (if any) for that viewer alone".
                        if let Some(frame) = &self.last_frame {
                            if let Ok(encrypted) = secret.encrypt_json(frame) {
                                let _ = outbound.send(ProducerInbound::EncryptedOutput {
                                    viewer_id: viewer_id.clone(),
                                    encrypted,
                                    seq: frame.seq,
                                    timestamp: frame.timestamp,
                                });
                            }
                        }
                        self.secrets.insert(viewer_id, secret);
                        self.viewer_count.store(self.secrets.len(), Ordering::Relaxed);
                    }
                    Err(err) => warn!(%err, "failed to derive shared secret for new viewer"),
                }
            }
            ProducerOutbound::ViewerLeft { viewer_id, .. } => {
                self.secrets.remove(&viewer_id);
                self.viewer_count.store(self.secrets.len(), Ordering::Relaxed);
            }
            ProducerOutbound::EncryptedInput { viewer_id, encrypted, .. } => {
                let Some(secret) = self.secrets.get(&viewer_id) else {
                    warn!(%viewer_id, "input from viewer with no cached shared secret, dropping");
                    return;
                };
                // spec §4.2 / §7: decrypt-or-drop, never reflect the failure.
                match secret.decrypt_json::<InputPayload>(&encrypted) {
                    Ok(payload) => {
                        if let Err(err) = self.capture.inject(&payload).await {
                            warn!(%err, "key injection failed");
                        }
                    }
                    Err(err) => warn!(%err, "dropping undecryptable or malformed input"),
                }
            }
            ProducerOutbound::Input { keys, kind } => {
                // unencrypted single-session path.
                if let Err(err) = self.capture.inject(&InputPayload { keys, kind }).await {
                    warn!(%err, "key injection failed");
                }
            }
            ProducerOutbound::CliCommand { .. } => {
                // handled one level up by the daemon dispatcher, never by a
                // per-session core.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use termcast_protocol::InputKind;

    struct FakeCapture {
        frames: std::vec::IntoIter<&'static [u8]>,
        last: Option<Vec<u8>>,
        injected: Arc<Mutex<Vec<InputPayload>>>,
    }

    impl FakeCapture {
        fn new(frames: Vec<&'static [u8]>, injected: Arc<Mutex<Vec<InputPayload>>>) -> Self {
            FakeCapture { frames: frames.into_iter(), last: None, injected }
        }
    }

    impl PaneCapture for FakeCapture {
        async fn capture(&mut self) -> Result<Vec<u8>, ControllerError> {
            if let Some(next) = self.frames.next() {
                self.last = Some(next.to_vec());
            }
            Ok(self.last.clone().unwrap_or_default())
        }

        async fn inject(&mut self, payload: &InputPayload) -> Result<(), ControllerError> {
            self.injected.lock().unwrap().push(InputPayload {
                keys: payload.keys.clone(),
                kind: payload.kind,
            });
            Ok(())
        }
    }

    use crate::error::ControllerError;

    #[tokio::test]
    async fn new_viewer_gets_immediate_last_frame_and_future_publishes() {
        let injected = Arc::new(Mutex::new(Vec::new()));
        let capture = FakeCapture::new(vec![b"hello"], injected.clone());
        let mut core = ProducerCore::new(capture, Duration::from_millis(10));

        let viewer = KeyPair::generate();
        let shared = viewer.derive_shared(&core.public_key_base64()).unwrap();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ProducerInbound>();

        // seed a frame by emitting directly (mirrors what `run`'s initial
        // capture would do before any viewer has joined).
        core.emit_frame(b"hello".to_vec(), &out_tx);
        let _ = out_rx.try_recv(); // no viewers yet, nothing sent

        core.handle_inbound(
            ProducerOutbound::ViewerJoined {
                session_id: None,
                viewer_id: ViewerId::from("v1"),
                public_key: viewer.public_key_base64(),
            },
            &out_tx,
        )
        .await;

        let msg = out_rx.recv().await.expect("immediate last-frame push");
        match msg {
            ProducerInbound::EncryptedOutput { viewer_id, encrypted, seq, .. } => {
                assert_eq!(viewer_id, ViewerId::from("v1"));
                assert_eq!(seq, 1);
                let plaintext: OutputEvent = shared.decrypt_json(&encrypted).unwrap();
                assert_eq!(plaintext.content, "hello");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecryptable_input_is_dropped_not_reflected() {
        let injected = Arc::new(Mutex::new(Vec::new()));
        let capture = FakeCapture::new(vec![], injected.clone());
        let mut core = ProducerCore::new(capture, Duration::from_millis(10));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ProducerInbound>();

        let stranger = KeyPair::generate();
        let bogus_secret = stranger.derive_shared(&KeyPair::generate().public_key_base64()).unwrap();
        let envelope = bogus_secret
            .encrypt_json(&InputPayload { keys: "x".into(), kind: InputKind::Text })
            .unwrap();

        core.handle_inbound(
            ProducerOutbound::EncryptedInput {
                session_id: None,
                viewer_id: ViewerId::from("v1"),
                encrypted: envelope,
            },
            &out_tx,
        )
        .await;

        assert!(injected.lock().unwrap().is_empty());
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn repeated_identical_capture_does_not_advance_seq() {
        let injected = Arc::new(Mutex::new(Vec::new()));
        let capture = FakeCapture::new(vec![b"same", b"same"], injected);
        let mut core = ProducerCore::new(capture, Duration::from_millis(10));
        let (out_tx, _out_rx) = mpsc::unbounded_channel::<ProducerInbound>();

        let first = core.capture.capture().await.unwrap();
        core.emit_frame(first, &out_tx);
        assert_eq!(core.seq, 1);

        let second = core.capture.capture().await.unwrap();
        if core.last_snapshot.as_deref() == Some(second.as_slice()) {
            // idempotent: no new frame
        } else {
            core.emit_frame(second, &out_tx);
        }
        assert_eq!(core.seq, 1);
    }
}
