//! WebSocket protocol messages between a client and a Sutantra node.
//!
//! Every frame is a single JSON text message with a common envelope:
//!
//! ```text
//! {"type": "<message type>", "data": { ... }, "client_id"?: "...", "stream_id"?: "..."}
//! ```
//!
//! Browser-era peers also put relay payloads (`offer`, `answer`,
//! `candidate`, `stats`, `error`, `streamId`) beside `type` instead of
//! inside `data`. Those keys are kept in [`Envelope::extra`], read as a
//! fallback when `data` lacks them, and written in both places.
//!
//! The wire carries no correlation id. Responses are matched to requests by
//! message type alone, so at most one request of each kind can be in flight.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ClientRole, NodeInfo, RemoteStats, StreamDescriptor, StreamQuality};

// ── Envelope ────────────────────────────────────────────────────────

/// The outer envelope for all WebSocket messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type, e.g. "createStream".
    #[serde(rename = "type", alias = "message_type")]
    pub msg_type: String,
    /// Type-specific payload.
    #[serde(default = "empty_object")]
    pub data: Value,
    /// Node-assigned client id, echoed on responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Stream the frame refers to. The node reads this for join/leave.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    /// Any other top-level keys, verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Envelope {
    /// Create an envelope around a serializable payload.
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            msg_type: msg_type.into(),
            data: serde_json::to_value(payload)?,
            client_id: None,
            stream_id: None,
            extra: serde_json::Map::new(),
        })
    }

    /// An envelope with an empty `data` object.
    pub fn bare(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            data: empty_object(),
            client_id: None,
            stream_id: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Attach the top-level `stream_id` routing field.
    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    /// Also place `value` under `key` beside `type`.
    pub fn with_top_level(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// A payload field, looked up in `data` first and then at the top level.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key).or_else(|| self.extra.get(key))
    }

    /// The stream this frame refers to, wherever the sender put it.
    pub fn referenced_stream(&self) -> Option<String> {
        self.stream_id.clone().or_else(|| {
            ["stream_id", "streamId"]
                .iter()
                .find_map(|key| self.field(key))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
    }

    /// Parse the payload into a concrete type. A `null` payload is read as `{}`.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        if self.data.is_null() {
            serde_json::from_value(empty_object())
        } else {
            serde_json::from_value(self.data.clone())
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ── Signaling ───────────────────────────────────────────────────────

/// The three media-negotiation messages relayed through the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn wire_type(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }

    /// Key under which the opaque payload travels.
    pub fn field(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "candidate",
        }
    }
}

/// An opaque signaling payload plus the stream it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub stream_id: Option<String>,
    pub payload: Value,
}

impl Signal {
    fn into_envelope(self) -> Envelope {
        let mut data = serde_json::Map::new();
        if let Some(id) = &self.stream_id {
            data.insert("stream_id".into(), Value::String(id.clone()));
        }
        data.insert(self.kind.field().into(), self.payload.clone());
        let mut envelope = Envelope::bare(self.kind.wire_type())
            .with_top_level(self.kind.field(), self.payload);
        envelope.data = Value::Object(data);
        if let Some(id) = self.stream_id {
            envelope = envelope
                .with_top_level("streamId", Value::String(id.clone()))
                .with_stream_id(id);
        }
        envelope
    }

    /// Read a relayed signal. The payload is taken from `data` or the top
    /// level under its field name; failing both, the whole `data` value is
    /// the payload.
    fn from_envelope(kind: SignalKind, envelope: &Envelope) -> Self {
        let payload = match envelope.field(kind.field()) {
            Some(v) => v.clone(),
            None => envelope.data.clone(),
        };
        Signal {
            kind,
            stream_id: envelope.referenced_stream(),
            payload,
        }
    }
}

// ── Client → Node ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub client_type: ClientRole,
    /// Previously assigned session id when reconnecting, otherwise null.
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateStreamPayload {
    pub title: String,
    pub description: String,
    pub quality: StreamQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRefPayload {
    pub stream_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinStreamPayload {
    pub stream_id: String,
    pub offer: Value,
}

/// All message types a client can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Handshake(HandshakePayload),
    CreateStream(CreateStreamPayload),
    StopStream(StreamRefPayload),
    JoinStream(JoinStreamPayload),
    LeaveStream(StreamRefPayload),
    RequestStreamList,
    Signal(Signal),
    Ping,
}

impl ClientMessage {
    pub fn msg_type(&self) -> &'static str {
        match self {
            ClientMessage::Handshake(_) => "handshake",
            ClientMessage::CreateStream(_) => "createStream",
            ClientMessage::StopStream(_) => "stopStream",
            ClientMessage::JoinStream(_) => "joinStream",
            ClientMessage::LeaveStream(_) => "leaveStream",
            ClientMessage::RequestStreamList => "requestStreamList",
            ClientMessage::Signal(s) => s.kind.wire_type(),
            ClientMessage::Ping => "ping",
        }
    }

    pub fn into_envelope(self) -> Result<Envelope, serde_json::Error> {
        let msg_type = self.msg_type();
        let envelope = match self {
            ClientMessage::Handshake(p) => Envelope::new(msg_type, p)?,
            ClientMessage::CreateStream(p) => Envelope::new(msg_type, p)?,
            ClientMessage::StopStream(p) => Envelope::new(msg_type, p)?,
            ClientMessage::JoinStream(p) => {
                let stream_id = p.stream_id.clone();
                let offer = p.offer.clone();
                Envelope::new(msg_type, p)?
                    .with_stream_id(stream_id)
                    .with_top_level("offer", offer)
            }
            ClientMessage::LeaveStream(p) => {
                let stream_id = p.stream_id.clone();
                Envelope::new(msg_type, p)?.with_stream_id(stream_id)
            }
            ClientMessage::RequestStreamList | ClientMessage::Ping => Envelope::bare(msg_type),
            ClientMessage::Signal(signal) => signal.into_envelope(),
        };
        Ok(envelope)
    }

    /// Serialize straight to the JSON text sent on the wire.
    pub fn to_json(self) -> Result<String, serde_json::Error> {
        self.into_envelope()?.to_json()
    }
}

// ── Node → Client ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeResponsePayload {
    pub success: bool,
    pub client_id: Option<String>,
    pub node_type: Option<String>,
    pub node_id: Option<String>,
    pub web_port: Option<u16>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub peer_count: Option<u64>,
    pub block_height: Option<u64>,
}

impl HandshakeResponsePayload {
    pub fn node_info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.node_id.clone(),
            node_type: self.node_type.clone(),
            web_port: self.web_port,
            message: self.message.clone(),
            peer_count: self.peer_count,
            block_height: self.block_height,
        }
    }
}

/// Shared shape of `createStreamResponse`, `stopStreamResponse` and
/// `joinStreamResponse`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamResponsePayload {
    pub success: bool,
    pub stream_id: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    /// Media answer, only ever present on a join response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
}

impl StreamResponsePayload {
    /// The node's own text for a failed request, passed through untouched.
    pub fn rejection(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "Unknown error".into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamListPayload {
    pub streams: Vec<StreamDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamStatsPayload {
    pub stream_id: Option<String>,
    pub stats: RemoteStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    #[serde(alias = "error")]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PongPayload {
    pub timestamp: Option<i64>,
}

/// Every inbound message type a client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeMessageKind {
    HandshakeResponse,
    CreateStreamResponse,
    StopStreamResponse,
    JoinStreamResponse,
    StreamList,
    Offer,
    Answer,
    IceCandidate,
    StreamStats,
    Error,
    Pong,
}

impl NodeMessageKind {
    pub fn from_wire(msg_type: &str) -> Option<Self> {
        let kind = match msg_type {
            "handshakeResponse" | "handshake-response" => NodeMessageKind::HandshakeResponse,
            "createStreamResponse" => NodeMessageKind::CreateStreamResponse,
            "stopStreamResponse" => NodeMessageKind::StopStreamResponse,
            "joinStreamResponse" => NodeMessageKind::JoinStreamResponse,
            "streamList" => NodeMessageKind::StreamList,
            "offer" => NodeMessageKind::Offer,
            "answer" => NodeMessageKind::Answer,
            "ice-candidate" => NodeMessageKind::IceCandidate,
            "stream-stats" => NodeMessageKind::StreamStats,
            "error" => NodeMessageKind::Error,
            "pong" => NodeMessageKind::Pong,
            _ => return None,
        };
        Some(kind)
    }
}

/// All message types a node can send to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeMessage {
    HandshakeResponse(HandshakeResponsePayload),
    CreateStreamResponse(StreamResponsePayload),
    StopStreamResponse(StreamResponsePayload),
    JoinStreamResponse(StreamResponsePayload),
    StreamList(StreamListPayload),
    Signal(Signal),
    StreamStats(StreamStatsPayload),
    Error(ErrorPayload),
    Pong(PongPayload),
}

impl NodeMessage {
    /// Decode the payload of an envelope whose type is already known.
    pub fn decode(kind: NodeMessageKind, envelope: &Envelope) -> Result<Self, serde_json::Error> {
        let msg = match kind {
            NodeMessageKind::HandshakeResponse => {
                NodeMessage::HandshakeResponse(envelope.parse_payload()?)
            }
            NodeMessageKind::CreateStreamResponse => {
                NodeMessage::CreateStreamResponse(stream_response(envelope)?)
            }
            NodeMessageKind::StopStreamResponse => {
                NodeMessage::StopStreamResponse(stream_response(envelope)?)
            }
            NodeMessageKind::JoinStreamResponse => {
                NodeMessage::JoinStreamResponse(stream_response(envelope)?)
            }
            NodeMessageKind::StreamList => NodeMessage::StreamList(envelope.parse_payload()?),
            NodeMessageKind::Offer => {
                NodeMessage::Signal(Signal::from_envelope(SignalKind::Offer, envelope))
            }
            NodeMessageKind::Answer => {
                NodeMessage::Signal(Signal::from_envelope(SignalKind::Answer, envelope))
            }
            NodeMessageKind::IceCandidate => {
                NodeMessage::Signal(Signal::from_envelope(SignalKind::IceCandidate, envelope))
            }
            NodeMessageKind::StreamStats => NodeMessage::StreamStats(stream_stats(envelope)?),
            NodeMessageKind::Error => NodeMessage::Error(error_payload(envelope)?),
            NodeMessageKind::Pong => NodeMessage::Pong(envelope.parse_payload()?),
        };
        Ok(msg)
    }

    /// Decode an envelope. Unknown message types yield `Ok(None)`.
    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, serde_json::Error> {
        match NodeMessageKind::from_wire(&envelope.msg_type) {
            Some(kind) => Self::decode(kind, envelope).map(Some),
            None => Ok(None),
        }
    }
}

fn stream_response(envelope: &Envelope) -> Result<StreamResponsePayload, serde_json::Error> {
    let mut payload: StreamResponsePayload = envelope.parse_payload()?;
    if payload.stream_id.is_none() {
        payload.stream_id = envelope.referenced_stream();
    }
    if payload.answer.is_none() {
        payload.answer = envelope.extra.get("answer").cloned();
    }
    Ok(payload)
}

/// `stream-stats` nests counters under `stats`, inside `data` or beside
/// `type`, or sends them flat in `data`.
fn stream_stats(envelope: &Envelope) -> Result<StreamStatsPayload, serde_json::Error> {
    let stats: RemoteStats = match envelope.field("stats") {
        Some(nested) => serde_json::from_value(nested.clone())?,
        None => envelope.parse_payload()?,
    };
    Ok(StreamStatsPayload {
        stream_id: envelope.referenced_stream(),
        stats,
    })
}

/// `error` text lives in `data.message`, `data.error` or a top-level `error`.
fn error_payload(envelope: &Envelope) -> Result<ErrorPayload, serde_json::Error> {
    let mut payload: ErrorPayload = envelope.parse_payload()?;
    if payload.message.is_empty() {
        if let Some(text) = envelope.extra.get("error").and_then(Value::as_str) {
            payload.message = text.to_owned();
        }
    }
    Ok(payload)
}
