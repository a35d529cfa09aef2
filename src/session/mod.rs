//! Peer-to-peer session: one logical channel to one opponent.
//!
//! Lifecycle: `Idle -> Initializing -> {HostingWaiting | Joining} -> Connected -> (Closed | Idle)`.
//! Only establishment (room allocation, initial connect) is retried. Once a
//! channel is open, its loss is reported to subscribers as a synthetic
//! `OPPONENT_DISCONNECT` message and is final.

pub mod allocator;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::P2PMessage;
use crate::signaling::{
    ChannelEvent, ChannelReceiver, ChannelSender, ConnectMetadata, DataChannel, Registration,
    SignalingClient, SignalingError, SignalingLink,
};
use crate::types::{PeerIdentity, RoomCode};
pub use allocator::RoomCodeAllocator;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no free room code after {attempts} attempts")]
    RoomAllocationExhausted { attempts: u32 },

    #[error("signaling service error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("room {0} not found")]
    RoomNotFound(RoomCode),

    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    #[error("no answer from host within {0:?}")]
    ConnectionTimeout(Duration),

    #[error("session was torn down while starting")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Initializing,
    HostingWaiting,
    Joining,
    Connected,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub allocator: RoomCodeAllocator,
    /// Bound on the JOINING state
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allocator: RoomCodeAllocator::default(),
            connect_timeout: Duration::from_secs(8),
        }
    }
}

/// Inbound messages for one listener. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<P2PMessage>,
}

impl Subscription {
    /// `None` once the session has been destroyed
    pub async fn recv(&mut self) -> Option<P2PMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<P2PMessage> {
        self.rx.try_recv().ok()
    }
}

struct Connection {
    generation: u64,
    sender: ChannelSender,
    reader: JoinHandle<()>,
}

struct Inner {
    status: SessionStatus,
    identity: Option<PeerIdentity>,
    room_code: Option<RoomCode>,
    display_name: String,
    link: Option<Arc<dyn SignalingLink>>,
    accept_task: Option<JoinHandle<()>>,
    connection: Option<Connection>,
    /// Bumped for every installed connection
    generation: u64,
    /// Bumped by every teardown; establishment that straddles one is discarded
    epoch: u64,
    handlers: Vec<mpsc::UnboundedSender<P2PMessage>>,
}

impl Inner {
    fn dispatch(&mut self, msg: P2PMessage) {
        self.handlers.retain(|handler| handler.send(msg.clone()).is_ok());
    }

    fn drop_connection(&mut self) {
        if let Some(old) = self.connection.take() {
            old.sender.close();
            old.reader.abort();
        }
    }

    fn set_opponent_name(&mut self, name: &str) {
        if let Some(identity) = self.identity.as_mut() {
            if identity.remote_display_name.as_deref() != Some(name) {
                tracing::info!("Opponent is {}", name);
            }
            identity.remote_display_name = Some(name.to_string());
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct P2PSession {
    signaling: Arc<dyn SignalingClient>,
    config: SessionConfig,
    inner: Arc<Mutex<Inner>>,
}

impl P2PSession {
    pub fn new(signaling: Arc<dyn SignalingClient>, config: SessionConfig) -> Self {
        Self {
            signaling,
            config,
            inner: Arc::new(Mutex::new(Inner {
                status: SessionStatus::Idle,
                identity: None,
                room_code: None,
                display_name: String::new(),
                link: None,
                accept_task: None,
                connection: None,
                generation: 0,
                epoch: 0,
                handlers: Vec::new(),
            })),
        }
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.inner).status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    pub fn identity(&self) -> Option<PeerIdentity> {
        lock(&self.inner).identity.clone()
    }

    pub fn is_host(&self) -> bool {
        lock(&self.inner)
            .identity
            .as_ref()
            .map(|identity| identity.is_host)
            .unwrap_or(false)
    }

    /// Known once a handshake (or connection metadata) has been seen
    pub fn opponent_name(&self) -> Option<String> {
        lock(&self.inner)
            .identity
            .as_ref()
            .and_then(|identity| identity.remote_display_name.clone())
    }

    /// Our own name as announced to the opponent
    pub fn display_name(&self) -> String {
        lock(&self.inner).display_name.clone()
    }

    pub fn room_code(&self) -> Option<RoomCode> {
        lock(&self.inner).room_code.clone()
    }

    /// Allocate a room and wait for a guest. Returns the short code to share.
    pub async fn start_host_session(&self, display_name: &str) -> Result<RoomCode, SessionError> {
        self.teardown();
        let epoch = {
            let mut inner = lock(&self.inner);
            inner.status = SessionStatus::Initializing;
            inner.display_name = display_name.to_string();
            inner.epoch
        };

        let (code, registration) = match self
            .config
            .allocator
            .allocate_and_bind(self.signaling.as_ref())
            .await
        {
            Ok(allocated) => allocated,
            Err(e) => {
                self.fail_establishment(epoch);
                return Err(e);
            }
        };

        let Registration {
            address,
            incoming,
            link,
        } = registration;

        let mut inner = lock(&self.inner);
        if inner.epoch != epoch {
            link.deregister();
            return Err(SessionError::Cancelled);
        }
        inner.identity = Some(PeerIdentity {
            local_address: address,
            is_host: true,
            remote_display_name: None,
        });
        inner.room_code = Some(code.clone());
        inner.link = Some(link);
        inner.status = SessionStatus::HostingWaiting;
        inner.accept_task = Some(tokio::spawn(accept_loop(self.inner.clone(), incoming)));
        Ok(code)
    }

    /// Register under an arbitrary address so we can connect out
    pub async fn start_guest_session(&self, display_name: &str) -> Result<(), SessionError> {
        self.teardown();
        let epoch = {
            let mut inner = lock(&self.inner);
            inner.status = SessionStatus::Initializing;
            inner.display_name = display_name.to_string();
            inner.epoch
        };

        let registration = match self.signaling.register(None).await {
            Ok(registration) => registration,
            Err(e) => {
                tracing::error!("Guest registration failed: {}", e);
                self.fail_establishment(epoch);
                return Err(e.into());
            }
        };

        let mut inner = lock(&self.inner);
        if inner.epoch != epoch {
            registration.link.deregister();
            return Err(SessionError::Cancelled);
        }
        tracing::info!("Guest session ready as {}", registration.address);
        inner.identity = Some(PeerIdentity {
            local_address: registration.address,
            is_host: false,
            remote_display_name: None,
        });
        inner.link = Some(registration.link);
        inner.status = SessionStatus::Idle;
        Ok(())
    }

    /// Join the room behind `code`, registering as a guest first if needed
    pub async fn connect_to_room(&self, code: &str, display_name: &str) -> Result<(), SessionError> {
        let code = allocator::normalize_code(code);

        let needs_guest_session = {
            let inner = lock(&self.inner);
            inner.link.is_none() || inner.identity.as_ref().map_or(true, |i| i.is_host)
        };
        if needs_guest_session {
            self.start_guest_session(display_name).await?;
        }

        let (link, epoch) = {
            let mut inner = lock(&self.inner);
            let Some(link) = inner.link.clone() else {
                return Err(SessionError::Cancelled);
            };
            inner.drop_connection();
            inner.display_name = display_name.to_string();
            inner.status = SessionStatus::Joining;
            (link, inner.epoch)
        };

        let address = self.config.allocator.full_address(&code);
        tracing::info!("Connecting to room {} ({})", code, address);
        let metadata = ConnectMetadata {
            username: Some(display_name.to_string()),
        };

        let timeout = self.config.connect_timeout;
        let outcome = tokio::time::timeout(timeout, link.connect(&address, metadata)).await;

        let channel = match outcome {
            Ok(Ok(channel)) => channel,
            Ok(Err(SignalingError::PeerUnavailable(_))) => {
                tracing::warn!("Room {} not found", code);
                self.fail_join(epoch);
                return Err(SessionError::RoomNotFound(code));
            }
            Ok(Err(e)) => {
                tracing::warn!("Could not reach room {}: {}", code, e);
                self.fail_join(epoch);
                return Err(SessionError::HostUnreachable(e.to_string()));
            }
            Err(_) => {
                tracing::warn!("Room {} did not answer within {:?}", code, timeout);
                self.fail_join(epoch);
                return Err(SessionError::ConnectionTimeout(timeout));
            }
        };

        if lock(&self.inner).epoch != epoch {
            return Err(SessionError::Cancelled);
        }

        let sender = install_connection(&self.inner, channel);
        tracing::info!("Connected to room {}", code);
        send_on(
            &sender,
            &P2PMessage::Handshake {
                username: display_name.to_string(),
            },
        );
        lock(&self.inner).room_code = Some(code);
        Ok(())
    }

    /// Fire-and-forget. Silently dropped when no channel is open.
    pub fn send(&self, msg: &P2PMessage) {
        if matches!(msg, P2PMessage::OpponentDisconnect {}) {
            return;
        }
        let inner = lock(&self.inner);
        match &inner.connection {
            Some(connection) => {
                tracing::debug!("P2P send {}", msg.kind());
                send_on(&connection.sender, msg);
            }
            None => tracing::debug!("P2P: no open channel, dropping {}", msg.kind()),
        }
    }

    /// Listen to every inbound message, including the synthetic disconnect
    pub fn on_message(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner).handlers.push(tx);
        Subscription { rx }
    }

    /// Close the channel, release the address and drop all listeners.
    /// Safe to call repeatedly and from any state.
    pub fn destroy(&self) {
        self.teardown();
        lock(&self.inner).handlers.clear();
    }

    /// Everything `destroy` does except dropping listeners
    fn teardown(&self) {
        let mut inner = lock(&self.inner);
        inner.epoch += 1;
        inner.drop_connection();
        if let Some(task) = inner.accept_task.take() {
            task.abort();
        }
        if let Some(link) = inner.link.take() {
            link.deregister();
        }
        inner.identity = None;
        inner.room_code = None;
        inner.status = SessionStatus::Idle;
    }

    fn fail_establishment(&self, epoch: u64) {
        let mut inner = lock(&self.inner);
        if inner.epoch == epoch {
            inner.status = SessionStatus::Idle;
        }
    }

    /// The registration survives so the next join attempt can reuse it
    fn fail_join(&self, epoch: u64) {
        self.fail_establishment(epoch);
    }
}

impl Drop for P2PSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn send_on(sender: &ChannelSender, msg: &P2PMessage) {
    match msg.to_json() {
        Ok(json) => {
            if !sender.send(json) {
                tracing::debug!("P2P: channel already gone, dropping {}", msg.kind());
            }
        }
        Err(e) => tracing::error!("Failed to encode {}: {}", msg.kind(), e),
    }
}

/// Make `channel` the one open connection, closing any previous one
fn install_connection(inner_arc: &Arc<Mutex<Inner>>, channel: DataChannel) -> ChannelSender {
    let (sender, receiver) = channel.split();
    let mut inner = lock(inner_arc);
    inner.drop_connection();
    inner.generation += 1;
    let generation = inner.generation;
    let reader = tokio::spawn(read_loop(inner_arc.clone(), generation, receiver));
    inner.connection = Some(Connection {
        generation,
        sender: sender.clone(),
        reader,
    });
    inner.status = SessionStatus::Connected;
    sender
}

async fn accept_loop(inner: Arc<Mutex<Inner>>, mut incoming: mpsc::UnboundedReceiver<DataChannel>) {
    while let Some(channel) = incoming.recv().await {
        tracing::info!("Guest connected from {}", channel.remote);
        let guest_name = channel.metadata.username.clone();

        let sender = install_connection(&inner, channel);
        let username = {
            let mut inner = lock(&inner);
            if let Some(name) = guest_name.as_deref() {
                inner.set_opponent_name(name);
            }
            inner.display_name.clone()
        };
        send_on(&sender, &P2PMessage::Handshake { username });
    }
}

async fn read_loop(inner: Arc<Mutex<Inner>>, generation: u64, mut receiver: ChannelReceiver) {
    loop {
        match receiver.recv().await {
            ChannelEvent::Data(text) => {
                let msg = match P2PMessage::from_json(&text) {
                    Ok(P2PMessage::OpponentDisconnect {}) => continue,
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!("P2P: ignoring malformed message: {}", e);
                        continue;
                    }
                };
                tracing::debug!("P2P recv {}", msg.kind());

                let mut inner = lock(&inner);
                if inner.generation != generation {
                    return;
                }
                if let P2PMessage::Handshake { username } = &msg {
                    inner.set_opponent_name(username);
                }
                inner.dispatch(msg);
            }
            ChannelEvent::Close => {
                tracing::info!("P2P: channel closed by peer");
                break;
            }
            ChannelEvent::Error(e) => {
                tracing::warn!("P2P: channel error: {}", e);
                break;
            }
        }
    }

    let mut inner = lock(&inner);
    let current = inner
        .connection
        .as_ref()
        .is_some_and(|connection| connection.generation == generation);
    if current {
        inner.connection = None;
        inner.status = SessionStatus::Closed;
        inner.dispatch(P2PMessage::OpponentDisconnect {});
    }
}
