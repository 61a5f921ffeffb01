//! The `transport` module accepts WebSocket clients and hands them to the hub.
//!
//! It owns everything the hub deliberately does not: the TCP listener, the
//! WebSocket handshake, and the read half of every session. Text frames sent
//! by a client may be relayed to every other client.

pub mod websocket;

pub use websocket::{bind, serve, start_websocket_server};

#[cfg(test)]
mod tests;
