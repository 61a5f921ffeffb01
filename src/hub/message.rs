use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of events the CRUD layer announces to connected clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    PostCreated,
    PostUpdated,
    PostDeleted,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::PostCreated => "PostCreated",
            MessageKind::PostUpdated => "PostUpdated",
            MessageKind::PostDeleted => "PostDeleted",
        };
        f.write_str(name)
    }
}

/// Accepts both the wire name (`PostCreated`) and snake case (`post_created`).
impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('_', "").to_lowercase().as_str() {
            "postcreated" => Ok(MessageKind::PostCreated),
            "postupdated" => Ok(MessageKind::PostUpdated),
            "postdeleted" => Ok(MessageKind::PostDeleted),
            _ => Err(format!("unknown message kind: {s}")),
        }
    }
}

/// Envelope for events pushed through the hub.
///
/// Serialized as `{"type": "PostCreated", "payload": {...}}`. The hub itself
/// never inspects it; any `Serialize` value can be broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: Value,
}

impl HubMessage {
    pub fn new(kind: MessageKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}
