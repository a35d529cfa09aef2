//! Answer lookup: which players satisfy a team pairing, and is a typed
//! answer one of them.

pub mod roster;

use async_trait::async_trait;
use std::sync::Arc;

use crate::llm::{LlmError, LlmManager};
pub use roster::{PlayerRecord, Roster};

/// Result type for oracle operations
pub type OracleResult<T> = Result<T, OracleError>;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("player dataset unavailable: {0}")]
    Dataset(String),

    #[error("player dataset is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("AI verification failed: {0}")]
    Ai(#[from] LlmError),
}

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationSource {
    Local,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    pub source: VerificationSource,
    /// Career entries involving the two requested teams
    pub history: Vec<String>,
    pub canonical_name: Option<String>,
}

impl Verification {
    pub fn miss(source: VerificationSource) -> Self {
        Self {
            valid: false,
            source,
            history: Vec::new(),
            canonical_name: None,
        }
    }
}

#[async_trait]
pub trait AnswerOracle: Send + Sync {
    /// All known names for the pairing. Empty, not an error, without a dataset.
    async fn enumerate_valid_answers(&self, team_a: &str, team_b: &str) -> OracleResult<Vec<String>>;

    async fn verify(&self, team_a: &str, team_b: &str, candidate: &str) -> OracleResult<Verification>;
}

/// Local dataset first, then an optional AI check
pub struct RosterOracle {
    roster: Arc<Roster>,
    llm: Option<Arc<LlmManager>>,
}

impl RosterOracle {
    pub fn new(roster: Arc<Roster>, llm: Option<Arc<LlmManager>>) -> Self {
        Self { roster, llm }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }
}

#[async_trait]
impl AnswerOracle for RosterOracle {
    async fn enumerate_valid_answers(&self, team_a: &str, team_b: &str) -> OracleResult<Vec<String>> {
        Ok(self.roster.enumerate(team_a, team_b))
    }

    async fn verify(&self, team_a: &str, team_b: &str, candidate: &str) -> OracleResult<Verification> {
        if let Some(found) = self.roster.verify(team_a, team_b, candidate) {
            tracing::debug!("Local match {} for {} / {}", found.canonical_name, team_a, team_b);
            return Ok(Verification {
                valid: true,
                source: VerificationSource::Local,
                history: found.history,
                canonical_name: Some(found.canonical_name),
            });
        }

        // Too short to be worth a remote lookup
        if candidate.trim().chars().count() <= 2 {
            return Ok(Verification::miss(VerificationSource::Local));
        }

        let Some(llm) = &self.llm else {
            tracing::debug!("No AI configured, {} is not a known answer", candidate);
            return Ok(Verification::miss(VerificationSource::Ai));
        };

        tracing::info!("Checking AI for {}...", candidate);
        let valid = llm.verify_crossover(team_a, team_b, candidate.trim()).await?;
        Ok(Verification {
            valid,
            source: VerificationSource::Ai,
            history: Vec::new(),
            canonical_name: None,
        })
    }
}
