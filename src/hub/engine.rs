//! Hub engine
//!
//! This module contains the connection registry and the loop that owns it:
//! - registering upgraded connections and starting their drain tasks
//! - deregistering connections by identity (unknown ids are a no-op)
//! - fanning broadcasts out to every member's bounded outbound queue
//! - shutting down: closing every queue and waiting for drain tasks
//!
//! Concurrency and usage notes:
//! - `Hub` is a cheap, cloneable handle. All of its methods send a command
//!   to `HubRunner::run` and await the reply, so registry mutation and
//!   broadcast iteration are serialized through the same loop.
//! - The loop never awaits a member. Enqueueing uses `try_send` and a full
//!   queue is resolved by the configured `OverflowPolicy`, so one stalled
//!   peer cannot hold up a broadcaster.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use super::command::Command;
use crate::config::{HubSettings, OverflowPolicy};
use crate::connection::connection::StateCell;
use crate::connection::drain::{Drain, refuse};
use crate::connection::{Connection, ConnectionId, ConnectionState};
use crate::utils::HubError;

/// Snapshot of one registry member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
}

/// Outcome of one broadcast. `delivered` counts frames accepted into a
/// queue, not frames written to the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Members that skipped this frame under `OverflowPolicy::DropNewest`.
    pub dropped: usize,
    /// Members removed because their queue was full or already closed.
    pub evicted: Vec<ConnectionId>,
}

/// Handle used by the transport adapter and by producers.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

/// Back-reference held by drain tasks. It does not keep the loop alive.
#[derive(Clone)]
pub(crate) struct WeakHub {
    commands: mpsc::WeakSender<Command>,
    shutdown: CancellationToken,
}

impl WeakHub {
    pub(crate) fn upgrade(&self) -> Option<Hub> {
        self.commands.upgrade().map(|commands| Hub {
            commands,
            shutdown: self.shutdown.clone(),
        })
    }
}

impl Hub {
    /// Create a hub handle and the loop that serves it. Nothing happens
    /// until `HubRunner::run` is polled.
    pub fn new(settings: HubSettings, shutdown: CancellationToken) -> (Hub, HubRunner) {
        let (tx, rx) = mpsc::channel(settings.command_buffer.max(1));
        let hub = Hub {
            commands: tx,
            shutdown: shutdown.clone(),
        };
        let runner = HubRunner {
            weak: hub.downgrade(),
            settings,
            commands: rx,
            shutdown,
            registry: HashMap::new(),
            drains: JoinSet::new(),
        };
        (hub, runner)
    }

    /// Create a hub and run its loop on a new task.
    pub fn spawn(settings: HubSettings, shutdown: CancellationToken) -> (Hub, JoinHandle<()>) {
        let (hub, runner) = Hub::new(settings, shutdown);
        (hub, tokio::spawn(runner.run()))
    }

    pub(crate) fn downgrade(&self) -> WeakHub {
        WeakHub {
            commands: self.commands.downgrade(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Hand an upgraded connection to the hub. On success the connection is
    /// `Active`, reachable by broadcast, and its drain task is running.
    pub async fn register(&self, connection: Connection) -> Result<ConnectionId, HubError> {
        let state = connection.state_cell();
        let (reply, rx) = oneshot::channel();

        if self
            .commands
            .send(Command::Register { connection, reply })
            .await
            .is_err()
        {
            state.advance(ConnectionState::Closed);
            return Err(HubError::HubClosed);
        }

        rx.await.map_err(|_| HubError::HubClosed)?
    }

    /// Remove a connection from the registry. Calling this for an id that
    /// is not registered, including one already removed, is a no-op.
    pub async fn deregister(&self, id: &ConnectionId) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Deregister { id: *id, reply }).await?;
        rx.await.map_err(|_| HubError::HubClosed)
    }

    /// Serialize `message` once and enqueue it for every member except
    /// `excluded`. Returns after every enqueue attempt, without waiting for
    /// delivery. A serialization failure reaches nobody.
    pub async fn broadcast<T>(
        &self,
        message: &T,
        excluded: Option<&ConnectionId>,
    ) -> Result<BroadcastReport, HubError>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(message)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Broadcast {
            frame: WsMessage::text(text),
            excluded: excluded.copied(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::HubClosed)
    }

    pub async fn members(&self) -> Result<Vec<ConnectionInfo>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Members { reply }).await?;
        rx.await.map_err(|_| HubError::HubClosed)
    }

    pub async fn len(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Len { reply }).await?;
        rx.await.map_err(|_| HubError::HubClosed)
    }

    pub async fn is_empty(&self) -> Result<bool, HubError> {
        Ok(self.len().await? == 0)
    }

    /// Ask the loop, every drain task and the accept loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::HubClosed)
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

struct Member {
    info: ConnectionInfo,
    outbound: mpsc::Sender<WsMessage>,
    state: StateCell,
}

/// The coordination loop. Owns the registry and every drain task.
pub struct HubRunner {
    settings: HubSettings,
    commands: mpsc::Receiver<Command>,
    weak: WeakHub,
    shutdown: CancellationToken,
    registry: HashMap<ConnectionId, Member>,
    drains: JoinSet<()>,
}

impl HubRunner {
    /// Serve commands until the shutdown token fires or every `Hub` handle
    /// is dropped, then close all connections.
    pub async fn run(mut self) {
        info!(
            queue_capacity = self.settings.queue_capacity,
            max_connections = self.settings.max_connections,
            "Hub started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(joined) = self.drains.join_next(), if !self.drains.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Drain task panicked: {e}");
                        }
                    }
                }
            }
        }

        self.shut_down().await;
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { connection, reply } => {
                let result = self.on_connect(connection);
                let _ = reply.send(result);
            }
            Command::Deregister { id, reply } => {
                self.on_disconnect(&id);
                let _ = reply.send(());
            }
            Command::Broadcast {
                frame,
                excluded,
                reply,
            } => {
                let report = self.fan_out(frame, excluded);
                let _ = reply.send(report);
            }
            Command::Members { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Len { reply } => {
                let _ = reply.send(self.registry.len());
            }
        }
    }

    fn on_connect(&mut self, connection: Connection) -> Result<ConnectionId, HubError> {
        let limit = self.settings.max_connections;
        if self.registry.len() >= limit {
            warn!(peer = connection.peer(), limit, "Rejecting client: hub is full");
            let (peer, sink, state) = connection.into_parts();
            state.advance(ConnectionState::Closed);
            self.drains.spawn(refuse(
                peer,
                sink,
                "server is at capacity",
                Duration::from_millis(self.settings.write_timeout_ms),
            ));
            return Err(HubError::TooManyConnections { limit });
        }

        let (peer, sink, state) = connection.into_parts();

        let mut id = ConnectionId::new();
        while self.registry.contains_key(&id) {
            id = ConnectionId::new();
        }

        let (outbound, queue) = mpsc::channel(self.settings.queue_capacity.max(1));
        state.advance(ConnectionState::Active);
        self.registry.insert(
            id,
            Member {
                info: ConnectionInfo {
                    id,
                    peer: peer.clone(),
                    connected_at: Utc::now(),
                },
                outbound,
                state: state.clone(),
            },
        );

        self.drains.spawn(
            Drain {
                id,
                peer: peer.clone(),
                sink,
                queue,
                state,
                hub: self.weak.clone(),
                shutdown: self.shutdown.child_token(),
                write_timeout: Duration::from_millis(self.settings.write_timeout_ms),
            }
            .run(),
        );

        info!(%id, %peer, members = self.registry.len(), "Client connected");
        Ok(id)
    }

    /// Dropping the member drops its queue sender, which lets the drain task
    /// flush and exit. Returns whether `id` was registered.
    fn on_disconnect(&mut self, id: &ConnectionId) -> bool {
        match self.registry.remove(id) {
            Some(member) => {
                member.state.advance(ConnectionState::Closing);
                let connected_for = Utc::now() - member.info.connected_at;
                info!(
                    %id,
                    peer = %member.info.peer,
                    secs = connected_for.num_seconds(),
                    members = self.registry.len(),
                    "Client disconnected"
                );
                true
            }
            None => {
                debug!(%id, "Ignoring deregistration of unknown client");
                false
            }
        }
    }

    fn fan_out(&mut self, frame: WsMessage, excluded: Option<ConnectionId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut evict = Vec::new();

        for (id, member) in &self.registry {
            if excluded.as_ref() == Some(id) {
                continue;
            }

            match member.outbound.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => match self.settings.overflow_policy {
                    OverflowPolicy::DropNewest => {
                        warn!(%id, "Outbound queue full, dropping frame");
                        report.dropped += 1;
                    }
                    OverflowPolicy::Disconnect => {
                        warn!(%id, "Outbound queue full, disconnecting slow client");
                        evict.push(*id);
                    }
                },
                Err(TrySendError::Closed(_)) => {
                    debug!(%id, "Outbound queue already closed");
                    evict.push(*id);
                }
            }
        }

        for id in evict {
            if self.on_disconnect(&id) {
                report.evicted.push(id);
            }
        }

        debug!(
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted.len(),
            "Broadcast fanned out"
        );
        report
    }

    fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.registry.values().map(|m| m.info.clone()).collect()
    }

    /// Reject whatever is still queued, close every member's queue, then
    /// give drain tasks `shutdown_grace_ms` to flush before aborting them.
    async fn shut_down(mut self) {
        info!(members = self.registry.len(), "Hub shutting down");
        self.shutdown.cancel();
        self.commands.close();

        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Register { connection, reply } => {
                    connection.state_cell().advance(ConnectionState::Closed);
                    let _ = reply.send(Err(HubError::HubClosed));
                }
                Command::Deregister { id, reply } => {
                    self.on_disconnect(&id);
                    let _ = reply.send(());
                }
                Command::Broadcast { .. } => {}
                Command::Members { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Len { reply } => {
                    let _ = reply.send(self.registry.len());
                }
            }
        }

        let states: Vec<StateCell> = self
            .registry
            .drain()
            .map(|(_, member)| {
                member.state.advance(ConnectionState::Closing);
                member.state
            })
            .collect();

        let grace = Duration::from_millis(self.settings.shutdown_grace_ms);
        let drains = &mut self.drains;
        let drained = tokio::time::timeout(grace, async move {
            while drains.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.drains.len(),
                "Aborting drain tasks after shutdown grace period"
            );
            self.drains.shutdown().await;
            for state in states {
                state.advance(ConnectionState::Closed);
            }
        }

        info!("Hub stopped");
    }
}
