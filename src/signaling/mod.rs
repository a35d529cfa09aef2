//! Rendezvous service contract.
//!
//! A client claims an address on the service, accepts inbound channels on it and
//! opens channels to other addresses. Once open, a [`DataChannel`] delivers text
//! frames reliably and in order until either end closes it.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::types::PeerAddress;

pub use memory::MemoryRelay;
pub use ws::WsSignalingClient;

/// Result type for signaling operations
pub type SignalingResult<T> = Result<T, SignalingError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    #[error("address {0} is already taken")]
    UnavailableId(PeerAddress),

    #[error("peer {0} is unavailable")]
    PeerUnavailable(PeerAddress),

    #[error("signaling service unreachable: {0}")]
    Network(String),

    #[error("channel error: {0}")]
    Channel(String),
}

/// Out-of-band data carried with a connection request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectMetadata {
    #[serde(default)]
    pub username: Option<String>,
}

/// What one end of a channel observes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Data(String),
    Close,
    Error(String),
}

/// One end of an open, ordered, reliable text channel.
///
/// Dropping the channel closes it for the remote end.
#[derive(Debug)]
pub struct DataChannel {
    pub remote: PeerAddress,
    pub metadata: ConnectMetadata,
    outbound: mpsc::UnboundedSender<ChannelEvent>,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl DataChannel {
    pub fn new(
        remote: PeerAddress,
        metadata: ConnectMetadata,
        outbound: mpsc::UnboundedSender<ChannelEvent>,
        inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            remote,
            metadata,
            outbound,
            inbound,
        }
    }

    /// Two connected ends. `a` talks to `b_addr`, `b` talks to `a_addr`.
    pub fn pair(
        a_addr: &str,
        b_addr: &str,
        metadata: ConnectMetadata,
    ) -> (DataChannel, DataChannel) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            DataChannel::new(b_addr.to_string(), metadata.clone(), a_tx, a_rx),
            DataChannel::new(a_addr.to_string(), metadata, b_tx, b_rx),
        )
    }

    /// Split into a sender usable from anywhere and the receiving half
    pub fn split(self) -> (ChannelSender, ChannelReceiver) {
        (
            ChannelSender {
                outbound: self.outbound,
            },
            ChannelReceiver {
                inbound: self.inbound,
            },
        )
    }
}

#[derive(Debug, Clone)]
pub struct ChannelSender {
    outbound: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelSender {
    /// Returns false if the channel is already gone
    pub fn send(&self, text: String) -> bool {
        self.outbound.send(ChannelEvent::Data(text)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.outbound.send(ChannelEvent::Close);
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

#[derive(Debug)]
pub struct ChannelReceiver {
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl ChannelReceiver {
    /// Next event; a vanished sender reads as `Close`
    pub async fn recv(&mut self) -> ChannelEvent {
        self.inbound.recv().await.unwrap_or(ChannelEvent::Close)
    }
}

/// A claimed address on the rendezvous service
pub struct Registration {
    pub address: PeerAddress,
    /// Channels opened to us by other clients
    pub incoming: mpsc::UnboundedReceiver<DataChannel>,
    pub link: Arc<dyn SignalingLink>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Entry point to a rendezvous service
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Claim `address`, or let the service pick one when `None`.
    ///
    /// Fails with [`SignalingError::UnavailableId`] if another client holds it.
    async fn register(&self, address: Option<&str>) -> SignalingResult<Registration>;
}

/// Operations available while registered
#[async_trait]
pub trait SignalingLink: Send + Sync {
    /// Open a channel to `remote`. Resolves once the channel is open.
    async fn connect(&self, remote: &str, metadata: ConnectMetadata)
        -> SignalingResult<DataChannel>;

    /// Release the address. Safe to call more than once.
    fn deregister(&self);
}
