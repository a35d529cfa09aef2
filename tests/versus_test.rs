//! Two coordinators playing each other through the in-process relay.

use calcio::config::MatchTiming;
use calcio::coordinator::{MatchCoordinator, MatchSetup, Mode};
use calcio::oracle::{PlayerRecord, Roster, RosterOracle};
use calcio::session::{P2PSession, SessionConfig};
use calcio::signaling::MemoryRelay;
use calcio::stats::StatsStore;
use calcio::teams::TeamCatalog;
use calcio::types::{DrawReason, GamePhase, MatchResult, RoundOutcome, Winner};
use std::sync::Arc;
use std::time::Duration;

struct Side {
    session: Arc<P2PSession>,
    stats: StatsStore,
    _dir: tempfile::TempDir,
}

fn side(relay: &MemoryRelay) -> Side {
    let dir = tempfile::tempdir().unwrap();
    Side {
        session: Arc::new(P2PSession::new(
            Arc::new(relay.clone()),
            SessionConfig::default(),
        )),
        stats: StatsStore::new(dir.path().join("stats.json"), "PLAYER 1"),
        _dir: dir,
    }
}

fn oracle() -> Arc<RosterOracle> {
    let mut roster = Roster::default();
    roster.insert(
        "Mirko Vucinic",
        PlayerRecord {
            teams: vec![
                "Lecce".to_string(),
                "Roma".to_string(),
                "Juventus".to_string(),
            ],
            history: vec![
                "2000-2006 Lecce".to_string(),
                "2006-2011 Roma".to_string(),
                "2011-2014 Juventus".to_string(),
            ],
        },
    );
    Arc::new(RosterOracle::new(Arc::new(roster), None))
}

fn setup() -> MatchSetup {
    MatchSetup {
        mode: Mode::Solo,
        best_of: 3,
        catalog: TeamCatalog::builtin(),
        timing: MatchTiming::default(),
        local_name: "PLAYER 1".to_string(),
        opponent_name: "OPPONENT".to_string(),
        seed: None,
    }
}

/// Host and guest sessions with the handshake done, no coordinators yet
async fn connected(relay: &MemoryRelay) -> (Side, Side) {
    let host = side(relay);
    let guest = side(relay);

    let code = host.session.start_host_session("ALICE").await.unwrap();
    guest.session.connect_to_room(&code, "BOB").await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !host.session.is_connected() || guest.session.opponent_name().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handshake never completed");
    (host, guest)
}

fn game(side: &Side) -> MatchCoordinator {
    MatchCoordinator::versus(setup(), side.session.clone(), oracle(), side.stats.clone())
}

/// Host and guest connected, coordinators running on both ends
async fn start_match(relay: &MemoryRelay) -> (Side, Side, MatchCoordinator, MatchCoordinator) {
    let (host, guest) = connected(relay).await;
    let host_game = game(&host);
    let guest_game = game(&guest);
    (host, guest, host_game, guest_game)
}

async fn play_round(host_game: &MatchCoordinator, guest_game: &MatchCoordinator) {
    host_game.wait_until(|s| s.phase == GamePhase::Selection).await;
    guest_game.wait_until(|s| s.phase == GamePhase::Selection).await;
    host_game.pick_team("roma");
    guest_game.pick_team("juventus");
    host_game.wait_until(|s| s.phase == GamePhase::Playing).await;
    guest_game.wait_until(|s| s.phase == GamePhase::Playing).await;
}

#[tokio::test(start_paused = true)]
async fn test_score_reaches_both_sides() {
    let relay = MemoryRelay::new();
    let (_host, _guest, host_game, guest_game) = start_match(&relay).await;

    play_round(&host_game, &guest_game).await;
    let host_view = host_game.snapshot();
    assert_eq!(host_view.mode, Mode::Versus { is_host: true });
    assert_eq!(host_view.opponent_team.unwrap().id, "juventus");
    assert_eq!(host_view.opponent_name, "BOB");
    assert_eq!(guest_game.snapshot().opponent_team.unwrap().id, "roma");

    guest_game.submit_answer("vucinic");
    let guest_view = guest_game
        .wait_until(|s| s.phase == GamePhase::RoundEnd)
        .await;
    assert_eq!(guest_view.score.score_self, 1);

    let host_view = host_game.wait_until(|s| s.phase == GamePhase::RoundEnd).await;
    assert_eq!(host_view.score.score_opponent, 1);
    match host_view.last_outcome {
        Some(RoundOutcome::OpponentScored { answer, history }) => {
            assert_eq!(answer.as_deref(), Some("Mirko Vucinic"));
            assert_eq!(history.len(), 2);
        }
        other => panic!("Expected OpponentScored, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_guest_coordinator_starting_late_joins_the_match() {
    let relay = MemoryRelay::new();
    let (host, guest) = connected(&relay).await;

    let host_game = game(&host);
    host_game.wait_until(|s| s.phase == GamePhase::Selection).await;
    host_game.pick_team("roma");
    host_game.wait_until(|s| s.my_team.is_some()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let guest_game = game(&guest);
    let guest_view = guest_game
        .wait_until(|s| s.phase == GamePhase::Selection && s.opponent_team.is_some())
        .await;
    assert_eq!(guest_view.opponent_team.unwrap().id, "roma");
    assert_eq!(guest_view.score.target_wins, 2);

    guest_game.pick_team("juventus");
    host_game.wait_until(|s| s.phase == GamePhase::Playing).await;
    guest_game.wait_until(|s| s.phase == GamePhase::Playing).await;
    assert_eq!(host_game.snapshot().opponent_team.unwrap().id, "juventus");
}

#[tokio::test(start_paused = true)]
async fn test_guest_coordinator_starting_first_joins_the_match() {
    let relay = MemoryRelay::new();
    let (host, guest) = connected(&relay).await;

    let guest_game = game(&guest);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(guest_game.snapshot().phase, GamePhase::Waiting);

    let host_game = game(&host);
    play_round(&host_game, &guest_game).await;
}

#[tokio::test(start_paused = true)]
async fn test_host_timeout_draws_on_both_sides() {
    let relay = MemoryRelay::new();
    let (_host, _guest, host_game, guest_game) = start_match(&relay).await;

    play_round(&host_game, &guest_game).await;

    // Nobody answers: the host clock runs out first and tells the guest
    let host_view = host_game.wait_until(|s| s.phase == GamePhase::RoundEnd).await;
    let guest_view = guest_game
        .wait_until(|s| s.phase == GamePhase::RoundEnd)
        .await;
    let time_up = Some(RoundOutcome::Draw {
        reason: DrawReason::TimeUp,
    });
    assert_eq!(host_view.last_outcome, time_up);
    assert_eq!(guest_view.last_outcome, time_up);
    assert_eq!(guest_view.round, host_view.round);
}

#[tokio::test(start_paused = true)]
async fn test_quit_forfeits_to_opponent() {
    let relay = MemoryRelay::new();
    let (host, guest, host_game, guest_game) = start_match(&relay).await;

    play_round(&host_game, &guest_game).await;
    host_game.quit();

    let host_view = host_game.wait_until(|s| s.phase == GamePhase::MatchEnd).await;
    assert_eq!(host_view.score.winner, Some(Winner::Opponent));

    let guest_view = guest_game
        .wait_until(|s| s.phase == GamePhase::MatchEnd)
        .await;
    assert_eq!(guest_view.score.winner, Some(Winner::Disconnect));

    let host_stats = host.stats.load();
    assert_eq!(host_stats.losses, 1);
    assert_eq!(host_stats.matches[0].opponent, "BOB");
    assert_eq!(host_stats.matches[0].team, "Roma");

    let guest_stats = guest.stats.load();
    assert_eq!(guest_stats.wins, 1);
    assert_eq!(guest_stats.matches[0].result, MatchResult::Win);
    assert_eq!(guest_stats.matches[0].opponent, "ALICE");
}
