//! In-process rendezvous. Both players live in the same process; channels are
//! plain tokio queues.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use super::{
    ConnectMetadata, DataChannel, Registration, SignalingClient, SignalingError, SignalingLink,
    SignalingResult,
};
use crate::types::PeerAddress;

type Directory = Arc<Mutex<HashMap<PeerAddress, mpsc::UnboundedSender<DataChannel>>>>;

#[derive(Clone, Default)]
pub struct MemoryRelay {
    peers: Directory,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(address)
    }
}

#[async_trait]
impl SignalingClient for MemoryRelay {
    async fn register(&self, address: Option<&str>) -> SignalingResult<Registration> {
        let address = address
            .map(str::to_string)
            .unwrap_or_else(|| format!("peer-{}", ulid::Ulid::new()));

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
            if peers.contains_key(&address) {
                return Err(SignalingError::UnavailableId(address));
            }
            peers.insert(address.clone(), tx);
        }

        tracing::debug!("Memory relay: registered {}", address);

        Ok(Registration {
            address: address.clone(),
            incoming: rx,
            link: Arc::new(MemoryLink {
                address,
                peers: self.peers.clone(),
            }),
        })
    }
}

struct MemoryLink {
    address: PeerAddress,
    peers: Directory,
}

#[async_trait]
impl SignalingLink for MemoryLink {
    async fn connect(
        &self,
        remote: &str,
        metadata: ConnectMetadata,
    ) -> SignalingResult<DataChannel> {
        let acceptor = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(remote)
            .cloned()
            .ok_or_else(|| SignalingError::PeerUnavailable(remote.to_string()))?;

        let (ours, theirs) = DataChannel::pair(&self.address, remote, metadata);
        acceptor
            .send(theirs)
            .map_err(|_| SignalingError::PeerUnavailable(remote.to_string()))?;
        Ok(ours)
    }

    fn deregister(&self) {
        let removed = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.address);
        if removed.is_some() {
            tracing::debug!("Memory relay: released {}", self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::ChannelEvent;

    #[tokio::test]
    async fn test_duplicate_address_is_rejected() {
        let relay = MemoryRelay::new();
        let _first = relay.register(Some("CMG-AAAA")).await.unwrap();
        let second = relay.register(Some("CMG-AAAA")).await;
        assert_eq!(
            second.unwrap_err(),
            SignalingError::UnavailableId("CMG-AAAA".to_string())
        );
    }

    #[tokio::test]
    async fn test_deregister_frees_address() {
        let relay = MemoryRelay::new();
        let first = relay.register(Some("CMG-AAAA")).await.unwrap();
        first.link.deregister();
        first.link.deregister();
        assert!(!relay.is_registered("CMG-AAAA"));
        assert!(relay.register(Some("CMG-AAAA")).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_missing_peer() {
        let relay = MemoryRelay::new();
        let guest = relay.register(None).await.unwrap();
        let result = guest
            .link
            .connect("CMG-NOPE", ConnectMetadata::default())
            .await;
        assert_eq!(
            result.unwrap_err(),
            SignalingError::PeerUnavailable("CMG-NOPE".to_string())
        );
    }

    #[tokio::test]
    async fn test_connect_hands_channel_to_acceptor() {
        let relay = MemoryRelay::new();
        let mut host = relay.register(Some("CMG-HOST")).await.unwrap();
        let guest = relay.register(None).await.unwrap();

        let metadata = ConnectMetadata {
            username: Some("GUEST".to_string()),
        };
        let channel = guest.link.connect("CMG-HOST", metadata).await.unwrap();
        let accepted = host.incoming.recv().await.unwrap();

        assert_eq!(accepted.remote, guest.address);
        assert_eq!(accepted.metadata.username.as_deref(), Some("GUEST"));

        let (tx, _rx) = channel.split();
        let (_host_tx, mut host_rx) = accepted.split();
        tx.send("hello".to_string());
        assert_eq!(host_rx.recv().await, ChannelEvent::Data("hello".to_string()));
    }
}
