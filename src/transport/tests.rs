use crate::config::HubSettings;
use crate::hub::{Hub, HubMessage, MessageKind};
use crate::transport::{bind, serve};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tungstenite::protocol::Message as WsMessage;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(relay: bool) -> (SocketAddr, Hub, CancellationToken) {
    let shutdown = CancellationToken::new();
    let (hub, _task) = Hub::spawn(HubSettings::default(), shutdown.clone());
    let listener = bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(serve(listener, hub.clone(), relay, shutdown.clone()));
    (addr, hub, shutdown)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}"))
        .await
        .expect("WebSocket handshake failed");
    ws
}

async fn wait_for_members(hub: &Hub, expected: usize) {
    for _ in 0..200 {
        if hub.len().await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("hub never reached {expected} members");
}

async fn next_text(ws: &mut Client) -> String {
    let msg = timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for message")
        .expect("stream ended")
        .expect("read failed");
    match msg {
        WsMessage::Text(text) => text.as_str().to_owned(),
        other => panic!("Expected a text message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_broadcast_reaches_websocket_clients() {
    let (addr, hub, _shutdown) = start_server(true).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_members(&hub, 2).await;

    let event = HubMessage::new(MessageKind::PostCreated, json!({"id": "p1", "title": "hi"}));
    let report = hub.broadcast(&event, None).await.unwrap();
    assert_eq!(report.delivered, 2);

    for ws in [&mut a, &mut b] {
        let received: HubMessage = serde_json::from_str(&next_text(ws).await).unwrap();
        assert_eq!(received, event);
    }
}

#[tokio::test]
async fn test_client_message_is_relayed_to_others_only() {
    let (addr, hub, _shutdown) = start_server(true).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_members(&hub, 2).await;

    a.send(WsMessage::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .unwrap();

    let received: serde_json::Value = serde_json::from_str(&next_text(&mut b).await).unwrap();
    assert_eq!(received, json!({"type": "ping"}));
    assert!(timeout(Duration::from_millis(100), a.next()).await.is_err());
}

#[tokio::test]
async fn test_relay_disabled_ignores_client_messages() {
    let (addr, hub, _shutdown) = start_server(false).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_members(&hub, 2).await;

    a.send(WsMessage::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .unwrap();

    assert!(timeout(Duration::from_millis(100), b.next()).await.is_err());
}

#[tokio::test]
async fn test_invalid_json_keeps_connection_open() {
    let (addr, hub, _shutdown) = start_server(true).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_members(&hub, 2).await;

    a.send(WsMessage::Text("not json".to_string().into()))
        .await
        .unwrap();
    assert!(timeout(Duration::from_millis(100), b.next()).await.is_err());
    assert_eq!(hub.len().await.unwrap(), 2);

    hub.broadcast("still here", None).await.unwrap();
    assert_eq!(next_text(&mut a).await, "\"still here\"");
}

#[tokio::test]
async fn test_client_close_deregisters_connection() {
    let (addr, hub, _shutdown) = start_server(true).await;
    let mut a = connect(addr).await;
    let _b = connect(addr).await;
    wait_for_members(&hub, 2).await;

    a.close(None).await.expect("Failed to close WebSocket");

    wait_for_members(&hub, 1).await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let (addr, hub, shutdown) = start_server(true).await;
    let mut a = connect(addr).await;
    wait_for_members(&hub, 1).await;

    shutdown.cancel();

    let ended = timeout(Duration::from_secs(3), async {
        while let Some(msg) = a.next().await {
            match msg {
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "client was not disconnected");
}

#[tokio::test]
async fn test_deregistered_client_is_disconnected_and_silenced() {
    let (addr, hub, _shutdown) = start_server(true).await;
    let mut a = connect(addr).await;
    wait_for_members(&hub, 1).await;
    let a_id = hub.members().await.unwrap()[0].id;
    let mut b = connect(addr).await;
    wait_for_members(&hub, 2).await;

    hub.deregister(&a_id).await.unwrap();
    assert_eq!(hub.len().await.unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the server may already have dropped the socket
    let _ = a
        .send(WsMessage::Text(json!({"from": "evicted"}).to_string().into()))
        .await;
    assert!(timeout(Duration::from_millis(200), b.next()).await.is_err());

    let ended = timeout(Duration::from_secs(3), async {
        while let Some(msg) = a.next().await {
            if msg.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "deregistered client socket stayed open");
}
