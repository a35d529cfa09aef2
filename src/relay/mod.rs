//! Rendezvous relay server.
//!
//! Clients claim an address over a WebSocket, then open channels to other
//! addresses. The relay pairs the two ends and forwards channel frames between
//! them. A client that disconnects releases its address and closes every
//! channel it was part of.

pub mod frame;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::signaling::ConnectMetadata;
use crate::types::PeerAddress;
use frame::{ChannelId, ClientFrame, ServerFrame};

/// Shared relay state
#[derive(Clone, Default)]
pub struct RelayState {
    pub peers: Arc<RwLock<HashMap<PeerAddress, mpsc::UnboundedSender<ServerFrame>>>>,
    /// channel id -> (initiator, acceptor)
    pub channels: Arc<RwLock<HashMap<ChannelId, (PeerAddress, PeerAddress)>>>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an address for a connected client
    pub async fn register(
        &self,
        address: Option<PeerAddress>,
        outbox: mpsc::UnboundedSender<ServerFrame>,
    ) -> Result<PeerAddress, ServerFrame> {
        let address = address.unwrap_or_else(|| format!("peer-{}", ulid::Ulid::new()));
        let mut peers = self.peers.write().await;
        if peers.contains_key(&address) {
            return Err(ServerFrame::Error {
                code: frame::UNAVAILABLE_ID.to_string(),
                msg: format!("ID \"{}\" is taken", address),
            });
        }
        peers.insert(address.clone(), outbox);
        tracing::info!("Relay: {} registered ({} online)", address, peers.len());
        Ok(address)
    }

    /// Pair `from` with `to` on a new channel
    pub async fn open_channel(
        &self,
        from: &str,
        channel_id: ChannelId,
        to: PeerAddress,
        metadata: ConnectMetadata,
    ) {
        let target = self.peers.read().await.get(&to).cloned();
        let Some(target) = target else {
            tracing::debug!("Relay: {} asked for missing peer {}", from, to);
            self.deliver(from, ServerFrame::PeerUnavailable { channel_id, to })
                .await;
            return;
        };

        {
            let mut channels = self.channels.write().await;
            if channels.contains_key(&channel_id) {
                drop(channels);
                self.deliver(from, ServerFrame::PeerUnavailable { channel_id, to })
                    .await;
                return;
            }
            channels.insert(channel_id.clone(), (from.to_string(), to.clone()));
        }

        let _ = target.send(ServerFrame::Incoming {
            channel_id: channel_id.clone(),
            from: from.to_string(),
            metadata,
        });
        self.deliver(from, ServerFrame::Opened { channel_id }).await;
        tracing::info!("Relay: channel {} -> {} opened", from, to);
    }

    /// The other end of `channel_id` as seen from `from`, if `from` is a member
    async fn counterpart(&self, from: &str, channel_id: &str) -> Option<PeerAddress> {
        let channels = self.channels.read().await;
        let (a, b) = channels.get(channel_id)?;
        if a == from {
            Some(b.clone())
        } else if b == from {
            Some(a.clone())
        } else {
            None
        }
    }

    pub async fn forward(&self, from: &str, channel_id: ChannelId, text: String) {
        match self.counterpart(from, &channel_id).await {
            Some(other) => {
                self.deliver(&other, ServerFrame::Data { channel_id, text })
                    .await
            }
            None => tracing::debug!("Relay: dropping frame on unknown channel {}", channel_id),
        }
    }

    pub async fn close_channel(&self, from: &str, channel_id: ChannelId) {
        let Some(other) = self.counterpart(from, &channel_id).await else {
            return;
        };
        self.channels.write().await.remove(&channel_id);
        self.deliver(&other, ServerFrame::Closed { channel_id }).await;
    }

    /// Forget `address` and close all of its channels
    pub async fn release(&self, address: &str) {
        self.peers.write().await.remove(address);

        let orphaned: Vec<(ChannelId, PeerAddress)> = {
            let mut channels = self.channels.write().await;
            let ids: Vec<ChannelId> = channels
                .iter()
                .filter(|(_, (a, b))| a == address || b == address)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    channels.remove(&id).map(|(a, b)| {
                        let other = if a == address { b } else { a };
                        (id, other)
                    })
                })
                .collect()
        };

        for (channel_id, other) in orphaned {
            self.deliver(&other, ServerFrame::Closed { channel_id }).await;
        }
        tracing::info!("Relay: {} released", address);
    }

    async fn deliver(&self, address: &str, frame: ServerFrame) {
        if let Some(tx) = self.peers.read().await.get(address) {
            let _ = tx.send(frame);
        }
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/relay", get(relay_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

/// WebSocket upgrade handler
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serve one relay client until its socket closes
async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let mut address: Option<PeerAddress> = None;

    loop {
        tokio::select! {
            Some(frame) = outbox_rx.recv() => {
                if let Ok(json) = serde_json::to_string(&frame) {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => handle_frame(&state, &mut address, &outbox, frame).await,
                            Err(e) => {
                                tracing::warn!("Relay: failed to parse client frame: {}", e);
                                let _ = outbox.send(ServerFrame::Error {
                                    code: frame::PARSE_ERROR.to_string(),
                                    msg: format!("Invalid frame: {}", e),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("Relay: WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(address) = address {
        state.release(&address).await;
    }
}

async fn handle_frame(
    state: &RelayState,
    address: &mut Option<PeerAddress>,
    outbox: &mpsc::UnboundedSender<ServerFrame>,
    frame: ClientFrame,
) {
    if let ClientFrame::Register { address: wanted } = frame {
        if let Some(current) = address.as_deref() {
            let _ = outbox.send(ServerFrame::Error {
                code: frame::UNAVAILABLE_ID.to_string(),
                msg: format!("Already registered as {}", current),
            });
            return;
        }
        match state.register(wanted, outbox.clone()).await {
            Ok(claimed) => {
                let _ = outbox.send(ServerFrame::Registered {
                    address: claimed.clone(),
                });
                *address = Some(claimed);
            }
            Err(error) => {
                let _ = outbox.send(error);
            }
        }
        return;
    }

    let Some(from) = address.clone() else {
        let _ = outbox.send(ServerFrame::Error {
            code: frame::NOT_REGISTERED.to_string(),
            msg: "Register before opening channels".to_string(),
        });
        return;
    };

    match frame {
        ClientFrame::Connect {
            channel_id,
            to,
            metadata,
        } => state.open_channel(&from, channel_id, to, metadata).await,
        ClientFrame::Data { channel_id, text } => state.forward(&from, channel_id, text).await,
        ClientFrame::Close { channel_id } => state.close_channel(&from, channel_id).await,
        ClientFrame::Register { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn online(state: &RelayState, address: &str) -> mpsc::UnboundedReceiver<ServerFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .register(Some(address.to_string()), tx)
            .await
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_register_rejects_taken_address() {
        let state = RelayState::new();
        let _host = online(&state, "CMG-AB12").await;

        let (tx, _rx) = mpsc::unbounded_channel();
        match state.register(Some("CMG-AB12".to_string()), tx).await {
            Err(ServerFrame::Error { code, .. }) => assert_eq!(code, frame::UNAVAILABLE_ID),
            other => panic!("Expected unavailable-id error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_forward_and_release() {
        let state = RelayState::new();
        let mut host = online(&state, "CMG-AB12").await;
        let mut guest = online(&state, "guest-1").await;

        state
            .open_channel(
                "guest-1",
                "c1".to_string(),
                "CMG-AB12".to_string(),
                ConnectMetadata {
                    username: Some("BOB".to_string()),
                },
            )
            .await;

        assert_eq!(
            host.recv().await.unwrap(),
            ServerFrame::Incoming {
                channel_id: "c1".to_string(),
                from: "guest-1".to_string(),
                metadata: ConnectMetadata {
                    username: Some("BOB".to_string())
                },
            }
        );
        assert_eq!(
            guest.recv().await.unwrap(),
            ServerFrame::Opened {
                channel_id: "c1".to_string()
            }
        );

        state
            .forward("CMG-AB12", "c1".to_string(), "hi".to_string())
            .await;
        assert_eq!(
            guest.recv().await.unwrap(),
            ServerFrame::Data {
                channel_id: "c1".to_string(),
                text: "hi".to_string()
            }
        );

        state.release("CMG-AB12").await;
        assert_eq!(
            guest.recv().await.unwrap(),
            ServerFrame::Closed {
                channel_id: "c1".to_string()
            }
        );
        assert!(state.channels.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_to_missing_peer() {
        let state = RelayState::new();
        let mut guest = online(&state, "guest-1").await;

        state
            .open_channel(
                "guest-1",
                "c1".to_string(),
                "CMG-ZZZZ".to_string(),
                ConnectMetadata::default(),
            )
            .await;

        assert_eq!(
            guest.recv().await.unwrap(),
            ServerFrame::PeerUnavailable {
                channel_id: "c1".to_string(),
                to: "CMG-ZZZZ".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_outsider_cannot_use_channel() {
        let state = RelayState::new();
        let _host = online(&state, "CMG-AB12").await;
        let mut guest = online(&state, "guest-1").await;
        let _intruder = online(&state, "guest-2").await;

        state
            .open_channel(
                "guest-1",
                "c1".to_string(),
                "CMG-AB12".to_string(),
                ConnectMetadata::default(),
            )
            .await;
        let _opened = guest.recv().await;

        state
            .forward("guest-2", "c1".to_string(), "spoof".to_string())
            .await;
        state.close_channel("guest-2", "c1".to_string()).await;

        assert!(guest.try_recv().is_err());
        assert_eq!(state.channels.read().await.len(), 1);
    }
}
