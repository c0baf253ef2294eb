//! Session error types.

use std::fmt;

use thiserror::Error;

/// Session result type.
pub type Result<T> = std::result::Result<T, SessionError>;

/// The outbound operations whose responses are correlated by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    CreateStream,
    StopStream,
    JoinStream,
    StreamListQuery,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::CreateStream => write!(f, "createStream"),
            RequestKind::StopStream => write!(f, "stopStream"),
            RequestKind::JoinStream => write!(f, "joinStream"),
            RequestKind::StreamListQuery => write!(f, "requestStreamList"),
        }
    }
}

/// What a `Timeout` was waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Handshake,
    Request(RequestKind),
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Handshake => write!(f, "handshake"),
            TimeoutKind::Request(kind) => write!(f, "{kind}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Connect or send failure, or the connection dropped under a request.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Malformed frame. The connection stays open.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("a {0} request is already pending")]
    RequestAlreadyPending(RequestKind),

    #[error("session is not ready")]
    SessionNotReady,

    /// The node answered `success: false`; the text is the node's own.
    #[error("{0}")]
    RemoteRejected(String),

    #[error("{0} timed out")]
    Timeout(TimeoutKind),

    #[error("a stream is already active")]
    StreamAlreadyActive,

    #[error("active stream is not {0}")]
    WrongDirection(&'static str),

    #[error("no active stream")]
    NoActiveStream,

    #[error("media transport error: {0}")]
    Media(String),

    #[error("invalid config: {0}")]
    Config(String),

    /// The session task has shut down.
    #[error("session closed")]
    Closed,
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Protocol(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}
