//! The `connection` module defines one live duplex session with a remote peer.
//!
//! A `Connection` owns the write half of a transport and, once registered
//! with the hub, a drain task that is the only writer to that transport.
//! Its lifecycle is exposed as a `ConnectionState` watch channel.

pub mod connection;
pub mod drain;

pub use connection::{Connection, ConnectionId, ConnectionState};

#[cfg(test)]
mod tests;
