//! The `error` module defines the error type shared by the hub, its
//! connections and the transport adapter.
//!
//! Transport failures stay local to one connection and are only reported to
//! the drain task that hit them. Serialization and capacity failures are
//! returned to whoever made the call.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    /// The broadcast payload could not be encoded. Nothing was enqueued.
    #[error("failed to serialize broadcast payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport write timed out")]
    WriteTimeout,

    /// Registration was refused because the registry is at capacity.
    #[error("connection limit of {limit} reached")]
    TooManyConnections { limit: usize },

    /// The coordination loop is no longer accepting commands.
    #[error("hub is shut down")]
    HubClosed,
}
