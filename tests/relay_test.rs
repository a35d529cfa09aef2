//! End-to-end tests against a real relay server on a loopback port.

use calcio::protocol::P2PMessage;
use calcio::relay::{self, RelayState};
use calcio::session::{P2PSession, SessionConfig, SessionError, Subscription};
use calcio::signaling::ws::WsSignalingClient;
use calcio::signaling::{SignalingClient, SignalingError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn spawn_relay() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, relay::router(RelayState::new()))
            .await
            .unwrap();
    });
    addr
}

fn client(addr: SocketAddr) -> Arc<WsSignalingClient> {
    Arc::new(WsSignalingClient::new(format!("ws://{}/relay", addr)))
}

async fn next(sub: &mut Subscription) -> P2PMessage {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for message")
        .expect("subscription closed")
}

#[tokio::test]
async fn test_health() {
    let addr = spawn_relay().await;
    let body = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_taken_address_is_refused() {
    let addr = spawn_relay().await;
    let first = client(addr).register(Some("CMG-ABCD")).await.unwrap();
    assert_eq!(first.address, "CMG-ABCD");

    match client(addr).register(Some("CMG-ABCD")).await {
        Err(SignalingError::UnavailableId(id)) => assert_eq!(id, "CMG-ABCD"),
        other => panic!("Expected UnavailableId, got {:?}", other.map(|r| r.address)),
    }

    // Anonymous registrations never collide
    let anon = client(addr).register(None).await.unwrap();
    assert!(anon.address.starts_with("peer-"));
}

#[tokio::test]
async fn test_session_over_relay() {
    let addr = spawn_relay().await;
    let host = P2PSession::new(client(addr), SessionConfig::default());
    let guest = P2PSession::new(client(addr), SessionConfig::default());

    let code = host.start_host_session("ALICE").await.unwrap();
    let mut host_rx = host.on_message();
    guest.start_guest_session("BOB").await.unwrap();
    let mut guest_rx = guest.on_message();
    guest.connect_to_room(&code.to_lowercase(), "BOB").await.unwrap();

    assert_eq!(
        next(&mut guest_rx).await,
        P2PMessage::Handshake {
            username: "ALICE".to_string()
        }
    );
    assert_eq!(
        next(&mut host_rx).await,
        P2PMessage::Handshake {
            username: "BOB".to_string()
        }
    );

    host.send(&P2PMessage::RoundTimeout {});
    assert_eq!(next(&mut guest_rx).await, P2PMessage::RoundTimeout {});

    // Guest leaves: host sees a synthetic disconnect
    guest.destroy();
    assert_eq!(next(&mut host_rx).await, P2PMessage::OpponentDisconnect {});
    assert!(!host.is_connected());
}

#[tokio::test]
async fn test_join_missing_room() {
    let addr = spawn_relay().await;
    let guest = P2PSession::new(client(addr), SessionConfig::default());

    match guest.connect_to_room("ZZZZ", "BOB").await {
        Err(SessionError::RoomNotFound(code)) => assert_eq!(code, "ZZZZ"),
        other => panic!("Expected RoomNotFound, got {:?}", other),
    }
    assert!(!guest.is_connected());
}
