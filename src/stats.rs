//! Local win/loss record, kept as a small JSON file.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};

use crate::types::{MatchRecord, MatchResult, UserStats};

/// Most recent matches kept; older ones are evicted first
pub const MAX_MATCH_RECORDS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("failed to write stats: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode stats: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct StatsStore {
    path: PathBuf,
    default_username: String,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>, default_username: &str) -> Self {
        Self {
            path: path.into(),
            default_username: default_username.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current stats. A missing or unreadable file reads as a fresh profile.
    pub fn load(&self) -> UserStats {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return UserStats::new(&self.default_username)
            }
            Err(e) => {
                tracing::warn!("Could not read {}: {}", self.path.display(), e);
                return UserStats::new(&self.default_username);
            }
        };

        match serde_json::from_str(&json) {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Ignoring corrupt stats file {}: {}", self.path.display(), e);
                UserStats::new(&self.default_username)
            }
        }
    }

    pub fn save_match(
        &self,
        result: MatchResult,
        opponent: &str,
        team: &str,
    ) -> Result<UserStats, StatsError> {
        let mut stats = self.load();
        match result {
            MatchResult::Win => stats.wins += 1,
            MatchResult::Loss => stats.losses += 1,
        }
        stats.matches.insert(
            0,
            MatchRecord {
                date: chrono::Utc::now().to_rfc3339(),
                opponent: opponent.to_string(),
                result,
                team: team.to_string(),
            },
        );
        stats.matches.truncate(MAX_MATCH_RECORDS);

        self.write(&stats)?;
        tracing::info!(
            "Recorded {:?} vs {} ({}W/{}L)",
            result,
            opponent,
            stats.wins,
            stats.losses
        );
        Ok(stats)
    }

    pub fn update_username(&self, name: &str) -> Result<(), StatsError> {
        let mut stats = self.load();
        stats.username = name.to_string();
        self.write(&stats)
    }

    /// Base64 of the stats JSON, for moving a profile between machines
    pub fn export(&self) -> String {
        let stats = self.load();
        match serde_json::to_string(&stats) {
            Ok(json) => STANDARD.encode(json),
            Err(e) => {
                tracing::error!("Failed to encode stats for export: {}", e);
                String::new()
            }
        }
    }

    /// Replace the stored profile with an exported one. Returns false for
    /// anything that does not decode to a plausible profile.
    pub fn import(&self, blob: &str) -> bool {
        let stats = match decode_export(blob.trim(), &self.load().username) {
            Some(stats) => stats,
            None => {
                tracing::warn!("Rejected invalid save code");
                return false;
            }
        };

        match self.write(&stats) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to store imported stats: {}", e);
                false
            }
        }
    }

    /// Write through a temp file so a crash never leaves half a profile behind
    fn write(&self, stats: &UserStats) -> Result<(), StatsError> {
        let json = serde_json::to_string_pretty(stats)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn decode_export(blob: &str, fallback_username: &str) -> Option<UserStats> {
    let bytes = STANDARD.decode(blob).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

    let wins = value.get("wins")?.as_f64()?;
    let matches = value.get("matches")?.as_array()?;
    let mut matches: Vec<MatchRecord> =
        serde_json::from_value(serde_json::Value::Array(matches.clone())).ok()?;
    matches.truncate(MAX_MATCH_RECORDS);

    let username = value
        .get("username")
        .and_then(|u| u.as_str())
        .filter(|u| !u.trim().is_empty())
        .unwrap_or(fallback_username)
        .to_string();
    let losses = value.get("losses").and_then(|l| l.as_f64()).unwrap_or(0.0);

    Some(UserStats {
        username,
        wins: wins.max(0.0) as u32,
        losses: losses.max(0.0) as u32,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> StatsStore {
        StatsStore::new(dir.path().join("calcio_save_data.json"), "PLAYER 1")
    }

    #[test]
    fn test_missing_file_is_fresh_profile() {
        let dir = tempfile::tempdir().unwrap();
        let stats = store(&dir).load();
        assert_eq!(stats, UserStats::new("PLAYER 1"));
    }

    #[test]
    fn test_corrupt_file_is_fresh_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "{not json").unwrap();
        assert_eq!(store.load().wins, 0);
    }

    #[test]
    fn test_save_match_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.save_match(MatchResult::Win, "BOB", "Roma").unwrap();
        let stats = store.save_match(MatchResult::Loss, "CPU", "Lazio").unwrap();

        assert_eq!((stats.wins, stats.losses), (1, 1));
        assert_eq!(stats.matches[0].opponent, "CPU");
        assert_eq!(stats.matches[1].result, MatchResult::Win);
        assert!(chrono::DateTime::parse_from_rfc3339(&stats.matches[0].date).is_ok());
        assert_eq!(store.load(), stats);
    }

    #[test]
    fn test_history_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        for i in 0..(MAX_MATCH_RECORDS + 5) {
            store
                .save_match(MatchResult::Win, &format!("OPP {}", i), "Inter")
                .unwrap();
        }

        let stats = store.load();
        assert_eq!(stats.matches.len(), MAX_MATCH_RECORDS);
        assert_eq!(stats.wins as usize, MAX_MATCH_RECORDS + 5);
        assert_eq!(stats.matches[0].opponent, format!("OPP {}", MAX_MATCH_RECORDS + 4));
        assert!(!dir.path().join("calcio_save_data.json.tmp").exists());
    }

    #[test]
    fn test_update_username() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.update_username("ALICE").unwrap();
        assert_eq!(store.load().username, "ALICE");
    }

    #[test]
    fn test_export_then_import_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let source = store(&dir);
        source.update_username("ALICE").unwrap();
        source.save_match(MatchResult::Win, "BOB", "Roma").unwrap();
        let blob = source.export();

        let other_dir = tempfile::tempdir().unwrap();
        let target = store(&other_dir);
        assert!(target.import(&blob));
        assert_eq!(target.load(), source.load());
    }

    #[test]
    fn test_import_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert!(!store.import("%%% not base64 %%%"));
        assert!(!store.import(&STANDARD.encode("not json")));
        assert!(!store.import(&STANDARD.encode(r#"{"wins":"3","matches":[]}"#)));
        assert!(!store.import(&STANDARD.encode(r#"{"wins":3,"matches":{}}"#)));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_import_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert!(store.import(&STANDARD.encode(r#"{"wins":4,"matches":[]}"#)));
        let stats = store.load();
        assert_eq!(stats.wins, 4);
        assert_eq!(stats.losses, 0);
        assert_eq!(stats.username, "PLAYER 1");
    }
}
