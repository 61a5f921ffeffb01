use super::connection::StateCell;
use super::{Connection, ConnectionId, ConnectionState};
use crate::config::HubSettings;
use crate::hub::Hub;
use futures::StreamExt;
use futures::channel::mpsc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tungstenite::protocol::Message as WsMessage;

#[test]
fn test_connection_id_is_unique() {
    let a = ConnectionId::new();
    let b = ConnectionId::new();
    assert_ne!(a, b);
    assert!(a.to_string().starts_with("conn-"));
}

#[test]
fn test_new_connection_is_connecting() {
    let (tx, _rx) = mpsc::unbounded::<WsMessage>();
    let conn = Connection::new("127.0.0.1:5000", tx);
    assert_eq!(conn.peer(), "127.0.0.1:5000");
    assert_eq!(conn.state(), ConnectionState::Connecting);
    assert!(!conn.state().is_terminal());
}

#[test]
fn test_state_never_moves_backwards() {
    let (tx, _rx) = mpsc::unbounded::<WsMessage>();
    let conn = Connection::new("peer", tx);
    let state: StateCell = conn.state_cell();

    assert!(state.advance(ConnectionState::Active));
    assert!(state.advance(ConnectionState::Closing));
    assert!(!state.advance(ConnectionState::Active));
    assert!(state.advance(ConnectionState::Closed));
    assert!(!state.advance(ConnectionState::Closing));
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[test]
fn test_state_watch_sees_transitions() {
    let (tx, _rx) = mpsc::unbounded::<WsMessage>();
    let conn = Connection::new("peer", tx);
    let watcher = conn.subscribe_state();
    conn.state_cell().advance(ConnectionState::Active);
    assert_eq!(*watcher.borrow(), ConnectionState::Active);
}

#[tokio::test]
async fn test_frames_are_written_in_enqueue_order() {
    let (hub, _task) = Hub::spawn(HubSettings::default(), CancellationToken::new());
    let (tx, mut rx) = mpsc::unbounded::<WsMessage>();
    hub.register(Connection::new("peer", tx)).await.unwrap();

    for text in ["m1", "m2", "m3"] {
        hub.broadcast(text, None).await.unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.next())
            .await
            .expect("timed out waiting for frame")
            .expect("transport closed");
        received.push(frame.into_text().unwrap().as_str().to_owned());
    }
    assert_eq!(received, vec!["\"m1\"", "\"m2\"", "\"m3\""]);
}
