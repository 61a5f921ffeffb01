//! Drain task
//!
//! Each registered connection gets exactly one drain task. It is the only
//! writer to the connection's transport and consumes the bounded outbound
//! queue in FIFO order. The task ends when:
//! - a write fails or exceeds the configured write timeout
//! - the hub drops the queue sender (deregistration or eviction)
//! - the hub shuts down, in which case buffered frames are flushed first
//!
//! On the way out it sends a best-effort close frame, asks the hub to
//! deregister the connection, and marks it `Closed`.

use std::time::Duration;

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, Message as WsMessage};

use super::connection::{BoxedSink, ConnectionId, ConnectionState, StateCell};
use crate::hub::WeakHub;
use crate::utils::HubError;

#[derive(Debug)]
enum DrainExit {
    QueueClosed,
    Shutdown,
    WriteFailed(HubError),
}

pub(crate) struct Drain {
    pub(crate) id: ConnectionId,
    pub(crate) peer: String,
    pub(crate) sink: BoxedSink,
    pub(crate) queue: mpsc::Receiver<WsMessage>,
    pub(crate) state: StateCell,
    pub(crate) hub: WeakHub,
    pub(crate) shutdown: CancellationToken,
    pub(crate) write_timeout: Duration,
}

impl Drain {
    pub(crate) async fn run(mut self) {
        let exit = self.pump().await;
        match &exit {
            DrainExit::WriteFailed(e) => {
                warn!(id = %self.id, peer = %self.peer, "Failed to write to client: {e}")
            }
            DrainExit::QueueClosed => debug!(id = %self.id, "Outbound queue closed"),
            DrainExit::Shutdown => debug!(id = %self.id, "Outbound queue flushed for shutdown"),
        }

        self.state.advance(ConnectionState::Closing);
        self.close_transport().await;

        match self.hub.upgrade() {
            Some(hub) => {
                if let Err(e) = hub.deregister(&self.id).await {
                    debug!(id = %self.id, "Deregistration skipped: {e}");
                }
            }
            None => debug!(id = %self.id, "Hub already gone"),
        }

        self.state.advance(ConnectionState::Closed);
        info!(id = %self.id, peer = %self.peer, "Send loop closed");
    }

    async fn pump(&mut self) -> DrainExit {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return self.flush().await,
                next = self.queue.recv() => next,
            };

            match next {
                Some(frame) => {
                    if let Err(e) = self.write(frame).await {
                        return DrainExit::WriteFailed(e);
                    }
                }
                None => return DrainExit::QueueClosed,
            }
        }
    }

    /// Stop accepting frames and write out whatever is already queued.
    async fn flush(&mut self) -> DrainExit {
        self.queue.close();
        while let Some(frame) = self.queue.recv().await {
            if let Err(e) = self.write(frame).await {
                return DrainExit::WriteFailed(e);
            }
        }
        DrainExit::Shutdown
    }

    async fn write(&mut self, frame: WsMessage) -> Result<(), HubError> {
        match timeout(self.write_timeout, self.sink.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(HubError::WriteTimeout),
        }
    }

    async fn close_transport(&mut self) {
        let sink = &mut self.sink;
        let closing = async move {
            sink.send(WsMessage::Close(None)).await?;
            sink.close().await
        };

        match timeout(self.write_timeout, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(id = %self.id, "Close frame not delivered: {e}"),
            Err(_) => debug!(id = %self.id, "Close frame timed out"),
        }
    }
}

/// Tell a peer the hub will not take it, then close its transport. Used for
/// connections rejected at registration, which never get a drain task.
pub(crate) async fn refuse(
    peer: String,
    mut sink: BoxedSink,
    reason: &'static str,
    write_timeout: Duration,
) {
    let frame = CloseFrame {
        code: CloseCode::Again,
        reason: reason.into(),
    };
    let closing = async {
        sink.send(WsMessage::Close(Some(frame))).await?;
        sink.close().await
    };

    match timeout(write_timeout, closing).await {
        Ok(Ok(())) => debug!(%peer, "Refused client: {reason}"),
        Ok(Err(e)) => debug!(%peer, "Refusal not delivered: {e}"),
        Err(_) => debug!(%peer, "Refusal timed out"),
    }
}
