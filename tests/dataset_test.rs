//! Checks against the bundled player dataset.

use calcio::oracle::{AnswerOracle, Roster, RosterOracle};
use calcio::teams::TeamCatalog;
use std::sync::Arc;

fn bundled() -> Roster {
    Roster::load(concat!(env!("CARGO_MANIFEST_DIR"), "/data/roster.json")).unwrap()
}

#[tokio::test]
async fn test_crossover_answers() {
    let oracle = RosterOracle::new(Arc::new(bundled()), None);
    let answers = oracle.enumerate_valid_answers("Roma", "Juventus").await.unwrap();
    assert_eq!(answers, vec!["Luca Toni", "Mirko Vucinic"]);

    let verdict = oracle.verify("JUVENTUS", "roma", "Toni").await.unwrap();
    assert!(verdict.valid);
    assert_eq!(verdict.history, vec!["2010 Roma", "2011 Juventus"]);
}

#[tokio::test]
async fn test_one_club_answers() {
    let oracle = RosterOracle::new(Arc::new(bundled()), None);
    assert_eq!(
        oracle.enumerate_valid_answers("Roma", "Roma").await.unwrap(),
        vec!["Francesco Totti"]
    );
    assert!(!oracle.verify("Roma", "Roma", "cassano").await.unwrap().valid);
}

#[tokio::test]
async fn test_typo_corrected_history() {
    let oracle = RosterOracle::new(Arc::new(bundled()), None);
    let verdict = oracle.verify("Sampdoria", "Lazio", "mancini").await.unwrap();
    assert_eq!(verdict.history, vec!["1982-1997 Sampdoria", "1997-2001 Lazio"]);
}

#[test]
fn test_catalog_picks_up_foreign_clubs() {
    let catalog = TeamCatalog::with_roster(&bundled());
    assert!(catalog.get("bocajuniors").is_some());
    assert!(catalog.get("bayernmunich").is_some());
    // Already a built-in team, not duplicated
    assert_eq!(catalog.all().iter().filter(|t| t.name == "Roma").count(), 1);
}
