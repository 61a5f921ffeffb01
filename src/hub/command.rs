use tokio::sync::oneshot;
use tungstenite::protocol::Message as WsMessage;

use super::engine::{BroadcastReport, ConnectionInfo};
use crate::connection::{Connection, ConnectionId};
use crate::utils::HubError;

/// A request for the coordination loop. Every registry read and write is
/// expressed as one of these, so the loop is the only code touching the map.
pub(crate) enum Command {
    Register {
        connection: Connection,
        reply: oneshot::Sender<Result<ConnectionId, HubError>>,
    },
    Deregister {
        id: ConnectionId,
        reply: oneshot::Sender<()>,
    },
    Broadcast {
        frame: WsMessage,
        excluded: Option<ConnectionId>,
        reply: oneshot::Sender<BroadcastReport>,
    },
    Members {
        reply: oneshot::Sender<Vec<ConnectionInfo>>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
}
