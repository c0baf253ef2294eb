//! # Handshake
//!
//! Declares the client role and obtains a session id from the node.
//!
//! ```text
//!   Idle ──request──▶ Sent ──success──▶ Confirmed
//!                      │
//!                  failure / timeout
//!                      ▼
//!                   Rejected
//! ```
//!
//! The role in the response is authoritative: when the node assigns a
//! different role than the one declared, the node's choice is kept.

use std::time::Duration;

use sutantra_common::models::{ClientRole, NodeInfo};
use sutantra_common::protocol::{ClientMessage, HandshakePayload, HandshakeResponsePayload};
use tokio::time::Instant;

use crate::error::{Result, SessionError, TimeoutKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Sent,
    Confirmed,
    Rejected,
}

/// What a confirmed handshake established.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeOutcome {
    pub session_id: String,
    pub role: ClientRole,
    pub node: NodeInfo,
}

#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    declared: ClientRole,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Handshake {
    pub fn new(declared: ClientRole, timeout: Duration) -> Self {
        Self {
            state: HandshakeState::Idle,
            declared,
            timeout,
            deadline: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            HandshakeState::Sent => self.deadline,
            _ => None,
        }
    }

    /// Build the handshake request. `previous_session_id` is the id from
    /// before a reconnect, if any.
    pub fn make_request(&mut self, previous_session_id: Option<String>, now: Instant) -> ClientMessage {
        self.state = HandshakeState::Sent;
        self.deadline = Some(now + self.timeout);
        ClientMessage::Handshake(HandshakePayload {
            client_type: self.declared,
            node_id: previous_session_id,
        })
    }

    pub fn handle_response(&mut self, resp: &HandshakeResponsePayload) -> Result<HandshakeOutcome> {
        if self.state != HandshakeState::Sent {
            return Err(SessionError::Protocol(format!(
                "handshake response in state {:?}",
                self.state
            )));
        }

        if !resp.success {
            self.state = HandshakeState::Rejected;
            let reason = resp
                .error
                .clone()
                .or_else(|| resp.message.clone())
                .unwrap_or_else(|| "rejected by node".into());
            return Err(SessionError::HandshakeFailed(reason));
        }

        let session_id = match resp.client_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                self.state = HandshakeState::Rejected;
                return Err(SessionError::HandshakeFailed(
                    "response carried no client_id".into(),
                ));
            }
        };

        let role = match resp.node_type.as_deref().map(str::parse::<ClientRole>) {
            Some(Ok(assigned)) => {
                if assigned != self.declared {
                    tracing::info!(
                        declared = %self.declared,
                        assigned = %assigned,
                        "node assigned a different role"
                    );
                }
                assigned
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "ignoring node_type in handshake response");
                self.declared
            }
            None => self.declared,
        };

        self.state = HandshakeState::Confirmed;
        Ok(HandshakeOutcome {
            session_id,
            role,
            node: resp.node_info(),
        })
    }

    /// Expire a sent handshake whose deadline has passed.
    pub fn check_timeout(&mut self, now: Instant) -> Option<SessionError> {
        match (self.state, self.deadline) {
            (HandshakeState::Sent, Some(deadline)) if now >= deadline => {
                self.state = HandshakeState::Rejected;
                Some(SessionError::Timeout(TimeoutKind::Handshake))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(client_id: &str, node_type: &str) -> HandshakeResponsePayload {
        HandshakeResponsePayload {
            success: true,
            client_id: Some(client_id.into()),
            node_type: Some(node_type.into()),
            node_id: Some("n1".into()),
            web_port: Some(8082),
            ..Default::default()
        }
    }

    #[test]
    fn viewer_handshake_flow() {
        let mut hs = Handshake::new(ClientRole::Viewer, Duration::from_secs(5));
        let now = Instant::now();
        let req = hs.make_request(None, now);
        assert_eq!(
            req,
            ClientMessage::Handshake(HandshakePayload {
                client_type: ClientRole::Viewer,
                node_id: None,
            })
        );
        assert_eq!(hs.state(), HandshakeState::Sent);
        assert_eq!(hs.deadline(), Some(now + Duration::from_secs(5)));

        let outcome = hs.handle_response(&response("c1", "viewer")).unwrap();
        assert_eq!(outcome.session_id, "c1");
        assert_eq!(outcome.role, ClientRole::Viewer);
        assert_eq!(outcome.node.node_id.as_deref(), Some("n1"));
        assert_eq!(hs.state(), HandshakeState::Confirmed);
        assert_eq!(hs.deadline(), None);
    }

    #[test]
    fn node_role_overrides_declared() {
        let mut hs = Handshake::new(ClientRole::Streamer, Duration::from_secs(5));
        hs.make_request(Some("c0".into()), Instant::now());
        let outcome = hs.handle_response(&response("c1", "viewer")).unwrap();
        assert_eq!(outcome.role, ClientRole::Viewer);
    }

    #[test]
    fn unknown_node_type_keeps_declared_role() {
        let mut hs = Handshake::new(ClientRole::Streamer, Duration::from_secs(5));
        hs.make_request(None, Instant::now());
        let outcome = hs.handle_response(&response("c1", "validator")).unwrap();
        assert_eq!(outcome.role, ClientRole::Streamer);
    }

    #[test]
    fn rejection_and_missing_id_fail() {
        let mut hs = Handshake::new(ClientRole::Viewer, Duration::from_secs(5));
        hs.make_request(None, Instant::now());
        let err = hs
            .handle_response(&HandshakeResponsePayload {
                success: false,
                message: Some("node full".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, SessionError::HandshakeFailed("node full".into()));
        assert_eq!(hs.state(), HandshakeState::Rejected);

        let mut hs = Handshake::new(ClientRole::Viewer, Duration::from_secs(5));
        hs.make_request(None, Instant::now());
        let err = hs
            .handle_response(&HandshakeResponsePayload {
                success: true,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::HandshakeFailed(_)));
    }

    #[test]
    fn response_before_request_is_protocol_error() {
        let mut hs = Handshake::new(ClientRole::Viewer, Duration::from_secs(5));
        let err = hs.handle_response(&response("c1", "viewer")).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
        assert_eq!(hs.state(), HandshakeState::Idle);
    }

    #[test]
    fn times_out_once() {
        let mut hs = Handshake::new(ClientRole::Viewer, Duration::from_secs(5));
        let now = Instant::now();
        hs.make_request(None, now);
        assert_eq!(hs.check_timeout(now + Duration::from_secs(4)), None);
        assert_eq!(
            hs.check_timeout(now + Duration::from_secs(5)),
            Some(SessionError::Timeout(TimeoutKind::Handshake))
        );
        assert_eq!(hs.check_timeout(now + Duration::from_secs(6)), None);
    }
}
