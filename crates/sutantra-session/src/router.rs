//! Inbound frame decoding and routing.
//!
//! Every text frame is decoded into an [`Envelope`], its type looked up in a
//! fixed table, and the payload decoded into the matching [`NodeMessage`].
//! Types missing from the table are dropped so that newer nodes can add
//! messages without breaking older clients. Malformed frames become a
//! local [`SessionError::Protocol`]; the connection stays up either way.

use sutantra_common::protocol::{Envelope, NodeMessage, NodeMessageKind};

use crate::error::{Result, SessionError};

/// Handler category for an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Handshake,
    StreamLifecycle,
    StreamList,
    SignalingRelay,
    Stats,
    Error,
    KeepAlive,
}

pub fn route_for(kind: NodeMessageKind) -> Route {
    match kind {
        NodeMessageKind::HandshakeResponse => Route::Handshake,
        NodeMessageKind::CreateStreamResponse
        | NodeMessageKind::StopStreamResponse
        | NodeMessageKind::JoinStreamResponse => Route::StreamLifecycle,
        NodeMessageKind::StreamList => Route::StreamList,
        NodeMessageKind::Offer | NodeMessageKind::Answer | NodeMessageKind::IceCandidate => {
            Route::SignalingRelay
        }
        NodeMessageKind::StreamStats => Route::Stats,
        NodeMessageKind::Error => Route::Error,
        NodeMessageKind::Pong => Route::KeepAlive,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Routed { route: Route, message: NodeMessage },
    /// A type this client does not know. Logged and dropped.
    Unknown(String),
}

pub fn decode(text: &str) -> Result<Inbound> {
    let envelope = Envelope::from_json(text)
        .map_err(|e| SessionError::Protocol(format!("invalid frame: {e}")))?;

    let Some(kind) = NodeMessageKind::from_wire(&envelope.msg_type) else {
        return Ok(Inbound::Unknown(envelope.msg_type));
    };

    let message = NodeMessage::decode(kind, &envelope).map_err(|e| {
        SessionError::Protocol(format!("invalid {} payload: {e}", envelope.msg_type))
    })?;

    Ok(Inbound::Routed {
        route: route_for(kind),
        message,
    })
}
