//! Wire protocol spoken over an open peer data channel.
//!
//! Every frame is a JSON object `{"type": ..., "payload": {...}}`.

use crate::types::TeamId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum P2PMessage {
    /// Announce our display name (sent by both sides)
    Handshake { username: String },
    /// Announce our confirmed team choice for the current round
    TeamSelect(TeamSelection),
    /// Host -> guest: begin the match
    StartGame {
        #[serde(rename = "matchConfig")]
        match_config: MatchConfig,
    },
    /// We scored the current round with this answer
    ScoreUpdate {
        answer: String,
        #[serde(default)]
        history: Vec<String>,
    },
    /// Host -> guest: the authoritative round clock ran out
    RoundTimeout {},
    /// We gave up the current round
    Surrender {},
    /// Never sent on the wire; injected locally when the channel closes
    OpponentDisconnect {},
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TeamSelection {
    Single {
        #[serde(rename = "teamId")]
        team_id: TeamId,
    },
    /// Older clients sent both ids; the first is the sender's own pick
    Legacy {
        #[serde(rename = "team1Id")]
        team1_id: TeamId,
        #[serde(rename = "team2Id")]
        team2_id: TeamId,
    },
}

impl TeamSelection {
    pub fn single(team_id: &str) -> Self {
        TeamSelection::Single {
            team_id: team_id.to_string(),
        }
    }

    /// The team the sender picked for itself
    pub fn sender_team(&self) -> &str {
        match self {
            TeamSelection::Single { team_id } => team_id,
            TeamSelection::Legacy { team1_id, .. } => team1_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchConfig {
    #[serde(rename = "bestOf")]
    pub best_of: u32,
}

impl P2PMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            P2PMessage::Handshake { .. } => "HANDSHAKE",
            P2PMessage::TeamSelect(_) => "TEAM_SELECT",
            P2PMessage::StartGame { .. } => "START_GAME",
            P2PMessage::ScoreUpdate { .. } => "SCORE_UPDATE",
            P2PMessage::RoundTimeout {} => "ROUND_TIMEOUT",
            P2PMessage::Surrender {} => "SURRENDER",
            P2PMessage::OpponentDisconnect {} => "OPPONENT_DISCONNECT",
        }
    }
}
