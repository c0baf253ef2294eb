//! Shared types for Sutantra node clients.
//!
//! This crate contains:
//! - **Protocol messages**: WebSocket frames exchanged with a streaming node
//! - **Data models**: roles, stream descriptors, quality settings, node metadata

pub mod models;
pub mod protocol;
