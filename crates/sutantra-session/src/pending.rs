//! Outstanding requests awaiting a node response.
//!
//! The wire has no request ids, so a response is matched to the one
//! outstanding request of its kind. A second request of a kind that is
//! already in flight is refused before anything is sent.

use std::collections::HashMap;
use std::time::Duration;

use sutantra_common::models::StreamDescriptor;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{RequestKind, Result, SessionError, TimeoutKind};

/// Where the outcome of a request is delivered.
pub(crate) enum Reply {
    CreateStream(oneshot::Sender<Result<String>>),
    StopStream(oneshot::Sender<Result<()>>),
    JoinStream(oneshot::Sender<Result<String>>),
    StreamList(oneshot::Sender<Result<Vec<StreamDescriptor>>>),
}

impl Reply {
    pub(crate) fn kind(&self) -> RequestKind {
        match self {
            Reply::CreateStream(_) => RequestKind::CreateStream,
            Reply::StopStream(_) => RequestKind::StopStream,
            Reply::JoinStream(_) => RequestKind::JoinStream,
            Reply::StreamList(_) => RequestKind::StreamListQuery,
        }
    }

    pub(crate) fn fail(self, err: SessionError) {
        match self {
            Reply::CreateStream(tx) => {
                let _ = tx.send(Err(err));
            }
            Reply::StopStream(tx) => {
                let _ = tx.send(Err(err));
            }
            Reply::JoinStream(tx) => {
                let _ = tx.send(Err(err));
            }
            Reply::StreamList(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

pub(crate) struct PendingRequest {
    pub kind: RequestKind,
    pub issued_at: Instant,
    pub deadline: Instant,
    /// Stream the request is about, when it names one.
    pub target: Option<String>,
    pub reply: Reply,
}

impl PendingRequest {
    pub(crate) fn new(reply: Reply, target: Option<String>, now: Instant, timeout: Duration) -> Self {
        Self {
            kind: reply.kind(),
            issued_at: now,
            deadline: now + timeout,
            target,
            reply,
        }
    }
}

#[derive(Default)]
pub(crate) struct PendingRequests {
    slots: HashMap<RequestKind, PendingRequest>,
}

impl PendingRequests {
    pub(crate) fn contains(&self, kind: RequestKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Occupy the slot for this kind, or hand the request back if taken.
    pub(crate) fn try_insert(&mut self, req: PendingRequest) -> std::result::Result<(), PendingRequest> {
        if self.slots.contains_key(&req.kind) {
            return Err(req);
        }
        self.slots.insert(req.kind, req);
        Ok(())
    }

    pub(crate) fn take(&mut self, kind: RequestKind) -> Option<PendingRequest> {
        self.slots.remove(&kind)
    }

    pub(crate) fn get(&self, kind: RequestKind) -> Option<&PendingRequest> {
        self.slots.get(&kind)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().map(|p| p.deadline).min()
    }

    /// Fail every request whose deadline has passed with `Timeout`,
    /// freeing its slot. Returns the expired kinds.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<RequestKind> {
        let due: Vec<RequestKind> = self
            .slots
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(k, _)| *k)
            .collect();
        for kind in &due {
            if let Some(p) = self.slots.remove(kind) {
                tracing::warn!(
                    kind = %kind,
                    waited_ms = now.saturating_duration_since(p.issued_at).as_millis() as u64,
                    "request timed out"
                );
                p.reply.fail(SessionError::Timeout(TimeoutKind::Request(*kind)));
            }
        }
        due
    }

    pub(crate) fn fail_all(&mut self, err: SessionError) {
        for (_, p) in self.slots.drain() {
            p.reply.fail(err.clone());
        }
    }

    pub(crate) fn kinds(&self) -> Vec<RequestKind> {
        self.slots.keys().copied().collect()
    }
}
