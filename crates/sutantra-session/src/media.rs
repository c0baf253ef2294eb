//! Boundary to the media transport (peer connection, tracks, ICE).
//!
//! The session never looks inside offers, answers or candidates. It hands
//! them to a [`MediaTransport`] through a dedicated worker task so that a
//! slow collaborator cannot stall inbound frame processing. The worker runs
//! calls one at a time in the order they were queued, which keeps remote
//! ICE candidates behind the answer they belong to.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::stats::TransportSample;

#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Produce a local offer to send with a join request.
    async fn create_offer(&self) -> anyhow::Result<Value>;

    async fn set_remote_answer(&self, answer: Value) -> anyhow::Result<()>;

    async fn add_remote_ice_candidate(&self, candidate: Value) -> anyhow::Result<()>;

    /// A node-initiated offer. Return an answer to relay back, if any.
    async fn handle_remote_offer(&self, _offer: Value) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    /// Current outbound counters, if the transport has any yet.
    async fn sample(&self) -> Option<TransportSample> {
        None
    }

    /// The stream this transport served is gone.
    async fn close(&self) {}
}

/// Signaling-only sessions: offers are empty objects, everything else is
/// accepted and ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMedia;

#[async_trait]
impl MediaTransport for NullMedia {
    async fn create_offer(&self) -> anyhow::Result<Value> {
        Ok(Value::Object(serde_json::Map::new()))
    }

    async fn set_remote_answer(&self, _answer: Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn add_remote_ice_candidate(&self, _candidate: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) enum MediaCommand {
    CreateOffer(oneshot::Sender<anyhow::Result<Value>>),
    RemoteOffer {
        offer: Value,
        reply: oneshot::Sender<anyhow::Result<Option<Value>>>,
    },
    RemoteAnswer(Value),
    RemoteIce(Value),
    Sample(oneshot::Sender<Option<TransportSample>>),
    Close,
}

/// Spawn the worker. It exits when the sender side is dropped.
pub(crate) fn spawn_worker(media: Arc<dyn MediaTransport>) -> mpsc::UnboundedSender<MediaCommand> {
    let (tx, mut rx) = mpsc::unbounded_channel::<MediaCommand>();
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                MediaCommand::CreateOffer(reply) => {
                    let _ = reply.send(media.create_offer().await);
                }
                MediaCommand::RemoteOffer { offer, reply } => {
                    let _ = reply.send(media.handle_remote_offer(offer).await);
                }
                MediaCommand::RemoteAnswer(answer) => {
                    if let Err(e) = media.set_remote_answer(answer).await {
                        tracing::warn!(error = %e, "media rejected remote answer");
                    }
                }
                MediaCommand::RemoteIce(candidate) => {
                    if let Err(e) = media.add_remote_ice_candidate(candidate).await {
                        tracing::warn!(error = %e, "media rejected remote ICE candidate");
                    }
                }
                MediaCommand::Sample(reply) => {
                    let _ = reply.send(media.sample().await);
                }
                MediaCommand::Close => media.close().await,
            }
        }
        tracing::trace!("media worker stopped");
    });
    tx
}
