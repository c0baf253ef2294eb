//! Scripted node for session tests.
//!
//! Accepts WebSocket connections on a loopback port and hands each one to
//! the test as a [`NodeConn`]: frames the client sent come out as JSON,
//! frames pushed in go straight to the client. Dropping a `NodeConn`
//! closes that socket from the node side.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sutantra_common::models::ClientRole;
use sutantra_session::config::ReconnectConfig;
use sutantra_session::supervisor::RetryPolicy;
use sutantra_session::{MediaTransport, SessionConfig, SessionEvent, SessionHandle, SessionState};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(5);

/// Route session logs to the test output. `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ─── Mock node ──────────────────────────────────────────────────────────────

pub struct MockNode {
    pub url: String,
    accepted: mpsc::UnboundedReceiver<NodeConn>,
}

pub struct NodeConn {
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl MockNode {
    pub async fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted_tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                    continue;
                };
                let (mut ws_tx, mut ws_rx) = ws.split();
                let (in_tx, incoming) = mpsc::unbounded_channel();
                let (outgoing, mut out_rx) = mpsc::unbounded_channel::<String>();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = ws_rx.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let value = serde_json::from_str(text.as_str())
                                        .unwrap_or(Value::String(text.as_str().to_owned()));
                                    let _ = in_tx.send(value);
                                }
                                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                _ => {}
                            },
                            out = out_rx.recv() => match out {
                                Some(text) => {
                                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    let _ = ws_tx.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                        }
                    }
                });

                if accepted_tx.send(NodeConn { incoming, outgoing }).is_err() {
                    break;
                }
            }
        });

        Self {
            url: format!("ws://{addr}/ws"),
            accepted,
        }
    }

    pub async fn accept(&mut self) -> NodeConn {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("no connection within timeout")
            .expect("listener stopped")
    }

    /// True if a client connected within `window`.
    pub async fn accepts_within(&mut self, window: Duration) -> bool {
        matches!(
            tokio::time::timeout(window, self.accepted.recv()).await,
            Ok(Some(_))
        )
    }
}

impl NodeConn {
    /// Next frame from the client, skipping keep-alive pings.
    pub async fn recv(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(WAIT, self.incoming.recv())
                .await
                .expect("no frame within timeout")
                .expect("client connection closed");
            if frame["type"] != "ping" {
                return frame;
            }
        }
    }

    /// Next frame from the client, pings included.
    pub async fn recv_any(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.incoming.recv())
            .await
            .expect("no frame within timeout")
            .expect("client connection closed")
    }

    /// Next frame, asserting its type.
    pub async fn expect(&mut self, msg_type: &str) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame["type"], msg_type, "unexpected frame: {frame}");
        frame
    }

    /// Asserts the client sends nothing but pings for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.incoming.recv()).await {
                Err(_) => return,
                Ok(None) => return,
                Ok(Some(frame)) if frame["type"] == "ping" => continue,
                Ok(Some(frame)) => panic!("unexpected frame: {frame}"),
            }
        }
    }

    /// Resolves once the client side has closed the socket.
    pub async fn closed(&mut self) {
        loop {
            let next = tokio::time::timeout(WAIT, self.incoming.recv())
                .await
                .expect("socket still open");
            if next.is_none() {
                return;
            }
        }
    }

    pub fn send(&self, frame: Value) {
        self.outgoing.send(frame.to_string()).unwrap();
    }

    pub fn send_raw(&self, text: &str) {
        self.outgoing.send(text.to_owned()).unwrap();
    }

    /// Answer the handshake the client just sent. Returns that request.
    pub async fn accept_handshake(&mut self, client_id: &str, node_type: &str) -> Value {
        let request = self.expect("handshake").await;
        self.send(json!({
            "type": "handshakeResponse",
            "data": {
                "success": true,
                "client_id": client_id,
                "node_type": node_type,
                "node_id": "node-1",
                "web_port": 8082,
                "message": "Welcome to Sutantra"
            }
        }));
        request
    }
}

// ─── Media ──────────────────────────────────────────────────────────────────

/// Records every signaling payload the session hands to media.
#[derive(Default)]
pub struct RecordingMedia {
    pub answers: Mutex<Vec<Value>>,
    pub candidates: Mutex<Vec<Value>>,
    pub closes: Mutex<u32>,
}

#[async_trait]
impl MediaTransport for RecordingMedia {
    async fn create_offer(&self) -> anyhow::Result<Value> {
        Ok(json!({"type": "offer", "sdp": "v=0"}))
    }

    async fn set_remote_answer(&self, answer: Value) -> anyhow::Result<()> {
        self.answers.lock().unwrap().push(answer);
        Ok(())
    }

    async fn add_remote_ice_candidate(&self, candidate: Value) -> anyhow::Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) {
        *self.closes.lock().unwrap() += 1;
    }
}

/// Offer generation always fails.
pub struct BrokenMedia;

#[async_trait]
impl MediaTransport for BrokenMedia {
    async fn create_offer(&self) -> anyhow::Result<Value> {
        anyhow::bail!("no camera")
    }

    async fn set_remote_answer(&self, _answer: Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn add_remote_ice_candidate(&self, _candidate: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

// ─── Session helpers ────────────────────────────────────────────────────────

pub fn test_config(url: &str, role: ClientRole) -> SessionConfig {
    SessionConfig {
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        liveness_interval: Duration::from_secs(60),
        keepalive: false,
        reconnect: ReconnectConfig {
            enabled: true,
            policy: RetryPolicy::Fixed(Duration::from_millis(100)),
            max_attempts: None,
        },
        ..SessionConfig::for_node(url, role)
    }
}

/// A session that completed its handshake as `client_id`.
pub async fn ready_session(
    node: &mut MockNode,
    config: SessionConfig,
    media: Arc<dyn MediaTransport>,
    client_id: &str,
) -> (SessionHandle, NodeConn) {
    let role = config.role;
    let session = SessionHandle::spawn(config, media);
    let connecting = {
        let session = session.clone();
        tokio::spawn(async move { session.connect().await })
    };
    let mut conn = node.accept().await;
    conn.accept_handshake(client_id, &role.to_string()).await;
    let established = connecting.await.unwrap().unwrap();
    assert_eq!(established.state, SessionState::Ready);
    (session, conn)
}

/// Next event matching `pred`, skipping the rest.
pub async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not seen within timeout")
}

/// State changes seen until `last` (inclusive).
pub async fn states_until(
    events: &mut broadcast::Receiver<SessionEvent>,
    last: SessionState,
) -> Vec<SessionState> {
    let mut seen = Vec::new();
    let reached = tokio::time::timeout(WAIT, async {
        loop {
            if let SessionEvent::StateChanged(state) = events.recv().await.expect("event stream ended") {
                seen.push(state);
                if state == last {
                    return;
                }
            }
        }
    })
    .await
    .is_ok();
    assert!(reached, "never reached {last:?}; saw {seen:?}");
    seen
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within timeout");
}
