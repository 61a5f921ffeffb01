//! # PostHub
//!
//! `posthub` is the real-time side of a posts backend: a process-wide hub of
//! live WebSocket connections that any part of the system can broadcast to.
//!
//! ## Core Modules
//!
//! - `hub`: the registry of active connections, its coordination loop, and broadcast.
//! - `connection`: one live session, its lifecycle state and its drain task.
//! - `config`: Handles loading and managing server configuration.
//! - `transport`: accepts WebSocket clients and registers them with the hub.
//! - `utils`: the shared error type and logging setup.

pub mod config;
pub mod connection;
pub mod hub;
pub mod transport;
pub mod utils;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use hub::{BroadcastReport, Hub, HubMessage, MessageKind};
pub use utils::HubError;
