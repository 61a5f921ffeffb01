//! The `hub` module is the single authority over which connections are
//! reachable by broadcast.
//!
//! - `engine`: the cloneable `Hub` handle and the `HubRunner` coordination loop.
//! - `command`: requests funneled from handles into the loop.
//! - `message`: a convenience envelope for producers of hub events.

pub(crate) mod command;
pub mod engine;
pub mod message;

pub use engine::{BroadcastReport, ConnectionInfo, Hub, HubRunner};
pub(crate) use engine::WeakHub;
pub use message::{HubMessage, MessageKind};
