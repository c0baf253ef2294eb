//! # sutantra-session
//!
//! Client-side session manager for a Sutantra node.
//!
//! Opens a WebSocket to a node, declares a role in a handshake, publishes or
//! watches one stream at a time, relays opaque media signaling, and keeps
//! the session alive across transport drops.
//!
//! ## Crate structure
//!
//! - [`lifecycle`]: Session task and the [`SessionHandle`] API
//! - [`session`]: Session, active stream and snapshot types
//! - [`handshake`]: Role declaration and session id assignment
//! - [`router`]: Inbound frame decoding and routing table
//! - `pending`: One outstanding request per kind, with deadlines
//! - [`supervisor`]: Reconnect policy
//! - [`transport`]: WebSocket connection adapter
//! - [`media`]: Media transport boundary
//! - [`stats`]: Throughput, latency and viewer stats
//! - [`config`]: TOML configuration
//! - [`error`]: Error taxonomy

pub mod config;
pub mod error;
pub mod handshake;
pub mod lifecycle;
pub mod media;
pub(crate) mod pending;
pub mod router;
pub mod session;
pub mod stats;
pub mod supervisor;
pub mod transport;

pub use config::SessionConfig;
pub use error::{RequestKind, Result, SessionError, TimeoutKind};
pub use lifecycle::{SessionEvent, SessionHandle};
pub use media::{MediaTransport, NullMedia};
pub use session::{ActiveStream, Direction, Session, SessionSnapshot, SessionState};
pub use stats::{StatsSummary, TransportSample};
