use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Sink;
use tokio::sync::watch;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::utils::HubError;

/// Write half of a transport session, type-erased so the hub can hold
/// connections over any sink.
pub type BoxedSink = Pin<Box<dyn Sink<WsMessage, Error = HubError> + Send>>;

/// Hub-assigned identity of a registered connection.
///
/// Generated at registration time and unrelated to the peer address, so two
/// peers behind the same proxy never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

/// Shared handle on a connection's state, held by the connection, its
/// registry entry and its drain task.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<watch::Sender<ConnectionState>>);

impl StateCell {
    fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Connecting);
        Self(Arc::new(tx))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.0.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.0.subscribe()
    }

    /// Move to `next` unless that would leave `Closed` or step backwards.
    /// Returns whether the state changed.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        self.0.send_if_modified(|current| {
            if rank(next) > rank(*current) {
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

fn rank(state: ConnectionState) -> u8 {
    match state {
        ConnectionState::Connecting => 0,
        ConnectionState::Active => 1,
        ConnectionState::Closing => 2,
        ConnectionState::Closed => 3,
    }
}

/// An established transport session waiting to be handed to the hub.
///
/// The transport adapter builds one per successful upgrade and passes it to
/// `Hub::register`, which takes ownership.
pub struct Connection {
    peer: String,
    sink: BoxedSink,
    state: StateCell,
}

impl Connection {
    /// Wrap the write half of a transport. Any sink of WebSocket frames
    /// works; its errors are reported as `HubError::Transport`.
    pub fn new<S>(peer: impl Into<String>, sink: S) -> Self
    where
        S: Sink<WsMessage> + Unpin + Send + 'static,
        S::Error: fmt::Display,
    {
        Self {
            peer: peer.into(),
            sink: Box::pin(TransportSink(sink)),
            state: StateCell::new(),
        }
    }

    /// Remote endpoint as reported by the transport. Informational only.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Watch lifecycle transitions. The receiver outlives the connection
    /// and observes the final `Closed`.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    pub(crate) fn into_parts(self) -> (String, BoxedSink, StateCell) {
        (self.peer, self.sink, self.state)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("state", &self.state.get())
            .finish()
    }
}

/// Maps every error of the wrapped sink to `HubError::Transport`. Unlike
/// `SinkExt::sink_map_err` it can report more than one error.
struct TransportSink<S>(S);

fn transport_error<E: fmt::Display>(e: E) -> HubError {
    HubError::Transport(e.to_string())
}

impl<S> Sink<WsMessage> for TransportSink<S>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    type Error = HubError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), HubError>> {
        Pin::new(&mut self.0).poll_ready(cx).map_err(transport_error)
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsMessage) -> Result<(), HubError> {
        Pin::new(&mut self.0).start_send(item).map_err(transport_error)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), HubError>> {
        Pin::new(&mut self.0).poll_flush(cx).map_err(transport_error)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), HubError>> {
        Pin::new(&mut self.0).poll_close(cx).map_err(transport_error)
    }
}
