//! WebSocket client for the relay server in [`crate::relay`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{
    ChannelEvent, ConnectMetadata, DataChannel, Registration, SignalingClient, SignalingError,
    SignalingLink, SignalingResult,
};
use crate::relay::frame::{self, ChannelId, ClientFrame, ServerFrame};
use crate::types::PeerAddress;

pub struct WsSignalingClient {
    url: String,
}

impl WsSignalingClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl SignalingClient for WsSignalingClient {
    async fn register(&self, address: Option<&str>) -> SignalingResult<Registration> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SignalingError::Network(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let hello = ClientFrame::Register {
            address: address.map(str::to_string),
        };
        let json =
            serde_json::to_string(&hello).map_err(|e| SignalingError::Network(e.to_string()))?;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| SignalingError::Network(e.to_string()))?;

        // The first meaningful reply decides the registration
        let claimed = loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(text.as_str()) {
                        Ok(ServerFrame::Registered { address }) => break address,
                        Ok(ServerFrame::Error { code, msg }) if code == frame::UNAVAILABLE_ID => {
                            tracing::debug!("Relay refused address: {}", msg);
                            return Err(SignalingError::UnavailableId(
                                address.unwrap_or_default().to_string(),
                            ));
                        }
                        Ok(ServerFrame::Error { msg, .. }) => {
                            return Err(SignalingError::Network(msg));
                        }
                        Ok(_) => continue,
                        Err(e) => return Err(SignalingError::Network(e.to_string())),
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SignalingError::Network(e.to_string())),
                None => {
                    return Err(SignalingError::Network(
                        "relay closed the connection".to_string(),
                    ))
                }
            }
        };

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let tables = Arc::new(Mutex::new(Tables::default()));

        let writer = tokio::spawn(async move {
            while let Some(frame) = writer_rx.recv().await {
                let Ok(json) = serde_json::to_string(&frame) else {
                    continue;
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let tables = tables.clone();
            let writer_tx = writer_tx.clone();
            tokio::spawn(async move {
                while let Some(msg) = source.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            match serde_json::from_str::<ServerFrame>(text.as_str()) {
                                Ok(frame) => dispatch(&tables, &writer_tx, &incoming_tx, frame),
                                Err(e) => tracing::warn!("Unparseable relay frame: {}", e),
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("Relay connection error: {}", e);
                            break;
                        }
                    }
                }
                lock(&tables).fail_all("relay connection lost");
            })
        };

        tracing::info!("Registered with relay as {}", claimed);

        Ok(Registration {
            address: claimed.clone(),
            incoming: incoming_rx,
            link: Arc::new(WsLink {
                address: claimed,
                writer: writer_tx,
                tables,
                tasks: Mutex::new(vec![writer, reader]),
            }),
        })
    }
}

#[derive(Default)]
struct Tables {
    /// Inbound side of every open channel
    channels: HashMap<ChannelId, mpsc::UnboundedSender<ChannelEvent>>,
    /// Connect requests waiting for Opened / PeerUnavailable
    pending: HashMap<ChannelId, oneshot::Sender<SignalingResult<()>>>,
}

impl Tables {
    fn fail_all(&mut self, reason: &str) {
        for (_, tx) in self.channels.drain() {
            let _ = tx.send(ChannelEvent::Error(reason.to_string()));
        }
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(SignalingError::Network(reason.to_string())));
        }
    }
}

/// Drops a connect request from `pending` once its caller stops waiting,
/// whether it got an answer or was cancelled
struct PendingConnect {
    tables: Arc<Mutex<Tables>>,
    channel_id: ChannelId,
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        lock(&self.tables).pending.remove(&self.channel_id);
    }
}

fn lock(tables: &Mutex<Tables>) -> std::sync::MutexGuard<'_, Tables> {
    tables.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create the local end of a relayed channel
fn open_endpoint(
    tables: &Arc<Mutex<Tables>>,
    writer: &mpsc::UnboundedSender<ClientFrame>,
    channel_id: ChannelId,
    remote: PeerAddress,
    metadata: ConnectMetadata,
) -> DataChannel {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    lock(tables).channels.insert(channel_id.clone(), in_tx);

    let writer = writer.clone();
    let tables = tables.clone();
    tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            match event {
                ChannelEvent::Data(text) => {
                    let frame = ClientFrame::Data {
                        channel_id: channel_id.clone(),
                        text,
                    };
                    if writer.send(frame).is_err() {
                        break;
                    }
                }
                ChannelEvent::Close | ChannelEvent::Error(_) => break,
            }
        }
        lock(&tables).channels.remove(&channel_id);
        let _ = writer.send(ClientFrame::Close { channel_id });
    });

    DataChannel::new(remote, metadata, out_tx, in_rx)
}

fn dispatch(
    tables: &Arc<Mutex<Tables>>,
    writer: &mpsc::UnboundedSender<ClientFrame>,
    incoming: &mpsc::UnboundedSender<DataChannel>,
    frame: ServerFrame,
) {
    match frame {
        ServerFrame::Incoming {
            channel_id,
            from,
            metadata,
        } => {
            tracing::debug!("Relay: incoming channel {} from {}", channel_id, from);
            let channel = open_endpoint(tables, writer, channel_id, from, metadata);
            let _ = incoming.send(channel);
        }
        ServerFrame::Opened { channel_id } => {
            if let Some(tx) = lock(tables).pending.remove(&channel_id) {
                let _ = tx.send(Ok(()));
            }
        }
        ServerFrame::PeerUnavailable { channel_id, to } => {
            let mut tables = lock(tables);
            tables.channels.remove(&channel_id);
            if let Some(tx) = tables.pending.remove(&channel_id) {
                let _ = tx.send(Err(SignalingError::PeerUnavailable(to)));
            }
        }
        ServerFrame::Data { channel_id, text } => {
            if let Some(tx) = lock(tables).channels.get(&channel_id) {
                let _ = tx.send(ChannelEvent::Data(text));
            }
        }
        ServerFrame::Closed { channel_id } => {
            if let Some(tx) = lock(tables).channels.remove(&channel_id) {
                let _ = tx.send(ChannelEvent::Close);
            }
        }
        ServerFrame::Error { code, msg } => {
            tracing::warn!("Relay error {}: {}", code, msg);
        }
        ServerFrame::Registered { .. } => {}
    }
}

struct WsLink {
    address: PeerAddress,
    writer: mpsc::UnboundedSender<ClientFrame>,
    tables: Arc<Mutex<Tables>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[async_trait]
impl SignalingLink for WsLink {
    async fn connect(
        &self,
        remote: &str,
        metadata: ConnectMetadata,
    ) -> SignalingResult<DataChannel> {
        let channel_id = ulid::Ulid::new().to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.tables).pending.insert(channel_id.clone(), tx);
        let _pending = PendingConnect {
            tables: self.tables.clone(),
            channel_id: channel_id.clone(),
        };

        // Register the endpoint first so frames sent right after Opened are not lost
        let channel = open_endpoint(
            &self.tables,
            &self.writer,
            channel_id.clone(),
            remote.to_string(),
            metadata.clone(),
        );

        self.writer
            .send(ClientFrame::Connect {
                channel_id,
                to: remote.to_string(),
                metadata,
            })
            .map_err(|_| SignalingError::Network("relay connection lost".to_string()))?;

        match rx.await {
            Ok(Ok(())) => Ok(channel),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SignalingError::Network(
                "relay connection lost".to_string(),
            )),
        }
    }

    fn deregister(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        lock(&self.tables).fail_all("deregistered");
        tracing::info!("Released relay address {}", self.address);
    }
}
