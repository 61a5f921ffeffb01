//! CLI for PostHub
//!
//! Subcommands:
//! - `server`: run the connection hub and its WebSocket endpoint
//! - `listen`: connect and print every broadcast received
//! - `publish`: send one event for the server to relay to everyone else

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use posthub::config::load_config;
use posthub::hub::{Hub, HubMessage, MessageKind};
use posthub::transport::start_websocket_server;
use posthub::utils::logging;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tungstenite::protocol::Message as WsMessage;

#[derive(Parser)]
#[command(name = "posthub")]
enum Command {
    /// Start the hub and the WebSocket server
    Server,
    /// Print every message broadcast by the server
    Listen {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
    },
    /// Publish one event; the server relays it to every other client
    Publish {
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// post_created, post_updated or post_deleted
        #[arg(long)]
        kind: MessageKind,
        /// JSON payload of the event
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let result = match cmd {
        Command::Server => run_server().await,
        Command::Listen { url } => {
            logging::init("info");
            run_listen(&url).await
        }
        Command::Publish { url, kind, payload } => {
            logging::init("info");
            run_publish(&url, kind, &payload).await
        }
    };

    if let Err(e) = result {
        error!("posthub failed: {}", e);
        std::process::exit(1);
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            return Err(e.into());
        }
    };
    logging::init(&config.logging.level);

    let shutdown = CancellationToken::new();
    let (hub, hub_task) = Hub::spawn(config.hub.clone(), shutdown.clone());

    tokio::select! {
        res = start_websocket_server(&config.server, hub, shutdown.clone()) => {
            res?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    shutdown.cancel();
    hub_task.await?;
    Ok(())
}

async fn run_listen(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;
    info!("Connected to {url}");

    while let Some(msg) = ws_stream.next().await {
        match msg? {
            WsMessage::Text(text) => println!("{}", text.as_str()),
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    info!("Server closed the connection");
    Ok(())
}

async fn run_publish(
    url: &str,
    kind: MessageKind,
    payload: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let message = HubMessage::new(kind, serde_json::from_str(payload)?);
    let (mut ws_stream, _response) = connect_async(url).await?;

    ws_stream
        .send(WsMessage::Text(serde_json::to_string(&message)?.into()))
        .await?;
    ws_stream.close(None).await?;

    info!("Published {kind}");
    Ok(())
}
