use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type TeamId = String;
pub type PeerAddress = String;
pub type RoomCode = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub colors: (String, String),
}

impl Team {
    pub fn new(id: &str, name: &str, primary: &str, secondary: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            colors: (primary.to_string(), secondary.to_string()),
        }
    }
}

/// Where the match is in its round cycle.
///
/// `Selection` through `RoundEnd` repeat once per round; `MatchEnd` is terminal.
/// `Waiting` is only used by a guest before the host's START_GAME arrives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    Waiting,
    Selection,
    Reveal,
    Playing,
    RoundEnd,
    MatchEnd,
}

impl GamePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GamePhase::MatchEnd)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Winner {
    #[serde(rename = "SELF")]
    SelfSide,
    #[serde(rename = "OPPONENT")]
    Opponent,
    #[serde(rename = "DISCONNECT")]
    Disconnect,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchState {
    pub score_self: u32,
    pub score_opponent: u32,
    pub target_wins: u32,
    pub winner: Option<Winner>,
}

impl MatchState {
    /// A best-of-N match is won at `ceil(N/2)` round wins.
    pub fn best_of(rounds: u32) -> Self {
        Self {
            score_self: 0,
            score_opponent: 0,
            target_wins: rounds.max(1).div_ceil(2),
            winner: None,
        }
    }

    pub fn is_over(&self) -> bool {
        self.winner.is_some()
    }

    /// Award a round to the local side. No-op once the match is decided.
    pub fn award_self(&mut self) {
        if self.is_over() {
            return;
        }
        self.score_self += 1;
        if self.score_self >= self.target_wins {
            self.winner = Some(Winner::SelfSide);
        }
    }

    /// Award a round to the opponent. No-op once the match is decided.
    pub fn award_opponent(&mut self) {
        if self.is_over() {
            return;
        }
        self.score_opponent += 1;
        if self.score_opponent >= self.target_wins {
            self.winner = Some(Winner::Opponent);
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrawReason {
    NoValidAnswers,
    TimeUp,
}

/// How a single round was resolved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundOutcome {
    SelfScored {
        answer: String,
        history: Vec<String>,
    },
    OpponentScored {
        answer: Option<String>,
        history: Vec<String>,
    },
    Draw {
        reason: DrawReason,
    },
    SelfSurrendered,
    OpponentSurrendered,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchResult {
    Win,
    Loss,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchRecord {
    /// ISO-8601 timestamp
    pub date: String,
    pub opponent: String,
    pub result: MatchResult,
    pub team: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStats {
    pub username: String,
    pub wins: u32,
    pub losses: u32,
    #[serde(default)]
    pub matches: Vec<MatchRecord>,
}

impl UserStats {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            wins: 0,
            losses: 0,
            matches: Vec::new(),
        }
    }
}

/// Read-only view of who we are talking to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub local_address: PeerAddress,
    pub is_host: bool,
    pub remote_display_name: Option<String>,
}
