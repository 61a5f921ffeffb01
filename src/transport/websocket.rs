//! WebSocket transport
//!
//! Responsibilities:
//! - Accept TCP connections until the shutdown token fires
//! - Perform the WebSocket handshake and wrap the write half in a `Connection`
//! - Register the connection with the `Hub`, then read the inbound half
//! - Relay valid JSON text frames to every other client, if enabled
//! - Deregister the connection once the peer closes or the read fails
//! - Stop reading once the hub deregisters or evicts the connection

use std::net::SocketAddr;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::accept_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::config::ServerSettings;
use crate::connection::{Connection, ConnectionId, ConnectionState};
use crate::hub::Hub;

pub async fn bind(addr: &str) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Bind to the configured address and serve until `shutdown` fires.
pub async fn start_websocket_server(
    settings: &ServerSettings,
    hub: Hub,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = bind(&addr).await?;

    info!("WebSocket server listening on ws://{addr}");

    serve(listener, hub, settings.relay_client_messages, shutdown).await;
    Ok(())
}

pub async fn serve(listener: TcpListener, hub: Hub, relay: bool, shutdown: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {e}");
                    continue;
                }
            },
        };

        tokio::spawn(handle_socket(
            stream,
            peer,
            hub.clone(),
            relay,
            shutdown.clone(),
        ));
    }

    info!("Accept loop stopped");
}

async fn handle_socket(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Hub,
    relay: bool,
    shutdown: CancellationToken,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, "WebSocket handshake error: {e}");
            return;
        }
    };

    let (ws_sender, mut ws_receiver) = ws_stream.split();

    let connection = Connection::new(peer.to_string(), ws_sender);
    let mut state = connection.subscribe_state();

    let id = match hub.register(connection).await {
        Ok(id) => id,
        Err(e) => {
            warn!(%peer, "Client not registered: {e}");
            return;
        }
    };

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = left_registry(&mut state) => {
                debug!(%id, "Connection deregistered, closing reader");
                break;
            }
            next = ws_receiver.next() => next,
        };

        match next {
            Some(Ok(WsMessage::Text(text))) => {
                if relay {
                    relay_text(&hub, &id, &text).await;
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(%id, "Read failed: {e}");
                break;
            }
        }
    }

    if let Err(e) = hub.deregister(&id).await {
        debug!(%id, "Deregistration skipped: {e}");
    }
}

/// Resolves once the hub has removed the connection or its drain task has
/// started closing it. A dropped state channel counts as closed.
async fn left_registry(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state
        .wait_for(|s| matches!(s, ConnectionState::Closing | ConnectionState::Closed))
        .await;
}

async fn relay_text(hub: &Hub, id: &ConnectionId, text: &str) {
    let value = match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                %id,
                "Invalid client message: {err} | {}",
                text.chars().take(100).collect::<String>()
            );
            return;
        }
    };

    match hub.broadcast(&value, Some(id)).await {
        Ok(report) => debug!(%id, delivered = report.delivered, "Relayed client message"),
        Err(e) => warn!(%id, "Relay failed: {e}"),
    }
}
