//! Environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::llm::LlmConfig;
use crate::session::{RoomCodeAllocator, SessionConfig};

/// Clock values for one match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTiming {
    pub selection: Duration,
    pub reveal: Duration,
    pub round: Duration,
    /// Delay before the computer opponent picks its team
    pub opponent_pick_min: Duration,
    pub opponent_pick_max: Duration,
    /// Window in which the computer opponent answers
    pub opponent_think_min: Duration,
    pub opponent_think_max: Duration,
    /// How long a guest waits past its own clock for the host's ROUND_TIMEOUT
    pub guest_grace: Duration,
}

impl Default for MatchTiming {
    fn default() -> Self {
        Self {
            selection: Duration::from_secs(30),
            reveal: Duration::from_secs(3),
            round: Duration::from_secs(60),
            opponent_pick_min: Duration::from_secs(1),
            opponent_pick_max: Duration::from_secs(3),
            opponent_think_min: Duration::from_secs(10),
            opponent_think_max: Duration::from_secs(35),
            guest_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub relay_addr: String,
    pub relay_url: String,
    pub session: SessionConfig,
    pub best_of: u32,
    pub timing: MatchTiming,
    pub roster_path: PathBuf,
    pub stats_path: PathBuf,
    pub username: String,
    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            relay_addr: "0.0.0.0:9417".to_string(),
            relay_url: "ws://127.0.0.1:9417/relay".to_string(),
            session: SessionConfig::default(),
            best_of: 3,
            timing: MatchTiming::default(),
            roster_path: PathBuf::from("data/roster.json"),
            stats_path: PathBuf::from("calcio_save_data.json"),
            username: "PLAYER 1".to_string(),
            llm: LlmConfig::default(),
        }
    }
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={}", key, raw);
            None
        }
    }
}

impl AppConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let allocator = RoomCodeAllocator {
            prefix: var("CALCIO_ROOM_PREFIX").unwrap_or(defaults.session.allocator.prefix),
            max_attempts: parsed::<u32>("CALCIO_ROOM_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.session.allocator.max_attempts),
            ..defaults.session.allocator
        };
        let session = SessionConfig {
            allocator,
            connect_timeout: parsed("CALCIO_CONNECT_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.session.connect_timeout),
        };

        let timing = MatchTiming {
            selection: parsed("CALCIO_SELECTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timing.selection),
            round: parsed("CALCIO_ROUND_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timing.round),
            ..defaults.timing
        };

        let config = Self {
            relay_addr: var("CALCIO_RELAY_ADDR").unwrap_or(defaults.relay_addr),
            relay_url: var("CALCIO_RELAY_URL").unwrap_or(defaults.relay_url),
            session,
            best_of: parsed::<u32>("CALCIO_BEST_OF")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.best_of),
            timing,
            roster_path: var("CALCIO_ROSTER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.roster_path),
            stats_path: var("CALCIO_STATS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.stats_path),
            username: var("CALCIO_USERNAME").unwrap_or(defaults.username),
            llm: LlmConfig::from_env(),
        };

        tracing::debug!(
            relay_url = %config.relay_url,
            best_of = config.best_of,
            room_prefix = %config.session.allocator.prefix,
            "Config loaded"
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "CALCIO_RELAY_ADDR",
        "CALCIO_ROOM_PREFIX",
        "CALCIO_ROOM_ATTEMPTS",
        "CALCIO_CONNECT_TIMEOUT",
        "CALCIO_BEST_OF",
        "CALCIO_ROUND_SECS",
        "CALCIO_USERNAME",
    ];

    fn clear() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear();
        let config = AppConfig::from_env();
        assert_eq!(config.relay_addr, "0.0.0.0:9417");
        assert_eq!(config.session.allocator.prefix, "CMG-");
        assert_eq!(config.session.allocator.max_attempts, 10);
        assert_eq!(config.session.connect_timeout, Duration::from_secs(8));
        assert_eq!(config.best_of, 3);
        assert_eq!(config.timing, MatchTiming::default());
        assert_eq!(config.username, "PLAYER 1");
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear();
        std::env::set_var("CALCIO_ROOM_PREFIX", "TEST-");
        std::env::set_var("CALCIO_ROOM_ATTEMPTS", "4");
        std::env::set_var("CALCIO_CONNECT_TIMEOUT", "2");
        std::env::set_var("CALCIO_BEST_OF", "5");
        std::env::set_var("CALCIO_ROUND_SECS", "45");
        std::env::set_var("CALCIO_USERNAME", "  ALICE ");

        let config = AppConfig::from_env();
        assert_eq!(config.session.allocator.prefix, "TEST-");
        assert_eq!(config.session.allocator.max_attempts, 4);
        assert_eq!(config.session.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.best_of, 5);
        assert_eq!(config.timing.round, Duration::from_secs(45));
        assert_eq!(config.timing.selection, Duration::from_secs(30));
        assert_eq!(config.username, "ALICE");

        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        clear();
        std::env::set_var("CALCIO_BEST_OF", "zero");
        std::env::set_var("CALCIO_ROOM_ATTEMPTS", "0");

        let config = AppConfig::from_env();
        assert_eq!(config.best_of, 3);
        assert_eq!(config.session.allocator.max_attempts, 10);

        clear();
    }
}
