//! One player's side of the game, wired up from [`AppConfig`].

use std::sync::Arc;

use crate::config::AppConfig;
use crate::coordinator::{MatchCoordinator, MatchSetup, Mode};
use crate::oracle::{Roster, RosterOracle};
use crate::protocol::P2PMessage;
use crate::session::{P2PSession, SessionError, Subscription};
use crate::signaling::{SignalingClient, WsSignalingClient};
use crate::stats::StatsStore;
use crate::teams::TeamCatalog;
use crate::types::RoomCode;

pub struct GameClient {
    config: AppConfig,
    signaling: Arc<dyn SignalingClient>,
    oracle: Arc<RosterOracle>,
    catalog: TeamCatalog,
    stats: StatsStore,
}

impl GameClient {
    /// Talk to the relay at `config.relay_url`
    pub fn from_config(config: AppConfig) -> Self {
        let signaling = Arc::new(WsSignalingClient::new(config.relay_url.clone()));
        Self::with_signaling(config, signaling)
    }

    pub fn with_signaling(config: AppConfig, signaling: Arc<dyn SignalingClient>) -> Self {
        let roster = Arc::new(Roster::load_or_empty(&config.roster_path));
        let catalog = TeamCatalog::with_roster(&roster);

        let llm = match config.llm.build_manager() {
            Ok(manager) => Some(Arc::new(manager)),
            Err(e) => {
                tracing::info!("AI answer check disabled: {}", e);
                None
            }
        };
        tracing::info!(
            players = roster.len(),
            teams = catalog.len(),
            ai = llm.is_some(),
            "Game data loaded"
        );

        let stats = StatsStore::new(&config.stats_path, &config.username);
        Self {
            oracle: Arc::new(RosterOracle::new(roster, llm)),
            config,
            signaling,
            catalog,
            stats,
        }
    }

    pub fn stats(&self) -> &StatsStore {
        &self.stats
    }

    pub fn catalog(&self) -> &TeamCatalog {
        &self.catalog
    }

    /// The saved name if the player picked one, otherwise the configured default
    pub fn username(&self) -> String {
        self.stats.load().username
    }

    pub fn setup(&self) -> MatchSetup {
        MatchSetup {
            mode: Mode::Solo,
            best_of: self.config.best_of,
            catalog: self.catalog.clone(),
            timing: self.config.timing.clone(),
            local_name: self.username(),
            opponent_name: "CPU".to_string(),
            seed: None,
        }
    }

    pub fn solo(&self) -> MatchCoordinator {
        MatchCoordinator::solo(self.setup(), self.oracle.clone(), self.stats.clone())
    }

    fn session(&self) -> Arc<P2PSession> {
        Arc::new(P2PSession::new(
            self.signaling.clone(),
            self.config.session.clone(),
        ))
    }

    /// Open a room. Share [`HostedRoom::code`] and wait for the guest.
    pub async fn host(&self) -> Result<HostedRoom, SessionError> {
        let session = self.session();
        let arrivals = session.on_message();
        let code = session.start_host_session(&self.username()).await?;
        Ok(HostedRoom {
            code,
            session,
            arrivals,
            setup: self.setup(),
            oracle: self.oracle.clone(),
            stats: self.stats.clone(),
        })
    }

    /// Join the room behind `code` and start the match
    pub async fn join(&self, code: &str) -> Result<MatchCoordinator, SessionError> {
        let session = self.session();
        session.connect_to_room(code, &self.username()).await?;
        Ok(MatchCoordinator::versus(
            self.setup(),
            session,
            self.oracle.clone(),
            self.stats.clone(),
        ))
    }
}

/// A room waiting for its guest
pub struct HostedRoom {
    pub code: RoomCode,
    session: Arc<P2PSession>,
    arrivals: Subscription,
    setup: MatchSetup,
    oracle: Arc<RosterOracle>,
    stats: StatsStore,
}

impl HostedRoom {
    /// Start the match once a guest has introduced itself. `None` if the
    /// room closed first.
    pub async fn wait_for_guest(mut self) -> Option<MatchCoordinator> {
        loop {
            match self.arrivals.recv().await? {
                P2PMessage::Handshake { username } => {
                    tracing::info!("{} joined room {}", username, self.code);
                    break;
                }
                other => tracing::debug!("Ignoring {} before the match", other.kind()),
            }
        }
        Some(MatchCoordinator::versus(
            self.setup,
            self.session,
            self.oracle,
            self.stats,
        ))
    }
}
