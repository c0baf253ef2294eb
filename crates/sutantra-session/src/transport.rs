//! WebSocket transport adapter.
//!
//! One [`Connection`] per successful [`open`]. The connection is a dumb
//! pipe: text frames in, text frames out, no retries. A background pump
//! task owns the socket and guarantees exactly one [`TransportEvent::Closed`]
//! per connection, carrying why it closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Result, SessionError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The node closed the socket or the stream ended.
    Remote,
    /// We asked for it.
    Local,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Closed(CloseReason),
}

enum Outbound {
    Text(String),
    Close,
}

/// Handle to one open connection.
pub struct Connection {
    id: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    open: Arc<AtomicBool>,
}

impl Connection {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queue a text frame. Dropped with a warning when the connection is
    /// not open; callers are expected to check state first.
    pub fn send(&self, text: String) -> bool {
        if !self.is_open() {
            tracing::warn!(conn = self.id, "connection not open, dropping frame");
            return false;
        }
        if self.outbound.send(Outbound::Text(text)).is_err() {
            tracing::warn!(conn = self.id, "connection pump gone, dropping frame");
            return false;
        }
        true
    }

    /// Ask the pump to close the socket. Idempotent.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Next inbound event. `None` once the `Closed` event has been consumed.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

#[cfg(test)]
impl Connection {
    /// A connection whose socket is gone but whose `Closed` event never
    /// arrived.
    pub(crate) fn dead(id: u64) -> Self {
        let (outbound, _) = mpsc::unbounded_channel();
        let (_, events) = mpsc::unbounded_channel();
        Self {
            id,
            outbound,
            events,
            open: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Open a WebSocket connection to `url`.
pub async fn open(url: &str, id: u64, connect_timeout: Duration) -> Result<Connection> {
    let (ws, _response) = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| SessionError::Transport(format!("connect to {url} timed out")))??;
    let (mut ws_tx, mut ws_rx) = ws.split();

    tracing::info!(url = %url, conn = id, "WebSocket connected");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let (ev_tx, ev_rx) = mpsc::unbounded_channel::<TransportEvent>();
    let open = Arc::new(AtomicBool::new(true));
    let pump_open = open.clone();

    tokio::spawn(async move {
        let reason = loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            tracing::debug!(conn = id, bytes = text.len(), "frame received");
                            let _ = ev_tx.send(TransportEvent::Message(text.as_str().to_owned()));
                        }
                        Some(Ok(Message::Binary(bin))) => {
                            tracing::warn!(conn = id, bytes = bin.len(), "binary frame ignored");
                        }
                        Some(Ok(Message::Close(_))) | None => break CloseReason::Remote,
                        Some(Err(e)) => break CloseReason::Error(e.to_string()),
                        _ => {} // Ping/Pong handled by tungstenite
                    }
                }

                cmd = out_rx.recv() => {
                    match cmd {
                        Some(Outbound::Text(text)) => {
                            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                                break CloseReason::Error(e.to_string());
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            break CloseReason::Local;
                        }
                    }
                }
            }
        };

        pump_open.store(false, Ordering::Release);
        tracing::info!(conn = id, reason = ?reason, "WebSocket closed");
        let _ = ev_tx.send(TransportEvent::Closed(reason));
    });

    Ok(Connection {
        id,
        outbound: out_tx,
        events: ev_rx,
        open,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn refused_endpoint_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = open(&format!("ws://{addr}/ws"), 1, Duration::from_secs(2))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Transport(_)));
    }

    #[tokio::test]
    async fn exactly_one_close_event_on_remote_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text("{\"type\":\"pong\"}".into())).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let mut conn = open(&format!("ws://{addr}/ws"), 7, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(
            conn.recv().await,
            Some(TransportEvent::Message("{\"type\":\"pong\"}".into()))
        );
        assert_eq!(conn.recv().await, Some(TransportEvent::Closed(CloseReason::Remote)));
        assert_eq!(conn.recv().await, None);
        assert!(!conn.is_open());
        assert!(!conn.send("late".into()));
    }

    #[tokio::test]
    async fn local_close_is_reported_as_local() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut conn = open(&format!("ws://{addr}/ws"), 3, Duration::from_secs(2))
            .await
            .unwrap();
        conn.close();
        conn.close();
        assert_eq!(conn.recv().await, Some(TransportEvent::Closed(CloseReason::Local)));
        assert_eq!(conn.recv().await, None);
    }
}
