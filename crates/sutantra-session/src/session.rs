//! Session state as seen by callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sutantra_common::models::{ClientRole, NodeInfo, StreamDescriptor};

use crate::error::RequestKind;
use crate::stats::StatsSummary;
use crate::supervisor::SupervisorState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    HandshakePending,
    Ready,
    Error,
}

/// The logical relationship to one node, surviving reconnects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    /// Assigned by the node at handshake; empty before that.
    pub session_id: String,
    pub role: ClientRole,
    pub state: SessionState,
    pub node: Option<NodeInfo>,
}

impl Session {
    pub fn new(role: ClientRole) -> Self {
        Self {
            session_id: String::new(),
            role,
            state: SessionState::Disconnected,
            node: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Publishing,
    Subscribing,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Publishing => "publishing",
            Direction::Subscribing => "subscribing",
        }
    }
}

/// The one stream a session is publishing or watching.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveStream {
    pub stream_id: String,
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
}

impl ActiveStream {
    pub fn new(stream_id: impl Into<String>, direction: Direction) -> Self {
        Self {
            stream_id: stream_id.into(),
            direction,
            started_at: Utc::now(),
        }
    }
}

/// Point-in-time copy of everything the session task owns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub active_stream: Option<ActiveStream>,
    /// Latest stream list from the node, replaced wholesale.
    pub streams: Vec<StreamDescriptor>,
    pub stats: StatsSummary,
    #[serde(skip)]
    pub supervisor: SupervisorState,
    #[serde(skip)]
    pub pending: Vec<RequestKind>,
}
