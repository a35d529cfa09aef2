//! Team catalog: the built-in Serie A list plus any club found in the dataset.

use crate::oracle::roster::{normalize, Roster};
use crate::types::Team;

const BUILTIN: &[(&str, &str, &str, &str)] = &[
    ("atalanta", "Atalanta", "#1E71B8", "#000000"),
    ("bologna", "Bologna", "#1A2F48", "#A21C26"),
    ("cremonese", "Cremonese", "#989898", "#A91018"),
    ("empoli", "Empoli", "#00579C", "#FFFFFF"),
    ("fiorentina", "Fiorentina", "#482E92", "#FFFFFF"),
    ("inter", "Inter", "#0068A8", "#000000"),
    ("juventus", "Juventus", "#000000", "#FFFFFF"),
    ("lazio", "Lazio", "#87D8F7", "#FFFFFF"),
    ("lecce", "Lecce", "#F7D800", "#DA291C"),
    ("milan", "Milan", "#FB090B", "#000000"),
    ("monza", "Monza", "#E30613", "#FFFFFF"),
    ("napoli", "Napoli", "#0067B3", "#FFFFFF"),
    ("roma", "Roma", "#8B0304", "#F6A323"),
    ("salernitana", "Salernitana", "#8A1E41", "#FFFFFF"),
    ("sampdoria", "Sampdoria", "#1B5497", "#FFFFFF"),
    ("sassuolo", "Sassuolo", "#00A752", "#000000"),
    ("spezia", "Spezia", "#000000", "#FFFFFF"),
    ("torino", "Torino", "#8A1E03", "#FFFFFF"),
    ("udinese", "Udinese", "#000000", "#FFFFFF"),
    ("verona", "Verona", "#005395", "#FCE100"),
];

/// Neutral colors for clubs that only appear in the dataset
const DISCOVERED_COLORS: (&str, &str) = ("#333333", "#FFFFFF");

#[derive(Debug, Clone)]
pub struct TeamCatalog {
    teams: Vec<Team>,
}

impl Default for TeamCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TeamCatalog {
    pub fn new(teams: Vec<Team>) -> Self {
        Self { teams }
    }

    pub fn builtin() -> Self {
        Self {
            teams: BUILTIN
                .iter()
                .map(|(id, name, primary, secondary)| Team::new(id, name, primary, secondary))
                .collect(),
        }
    }

    /// Built-in teams followed by dataset clubs that none of them already covers
    pub fn with_roster(roster: &Roster) -> Self {
        let mut catalog = Self::builtin();
        let mut added = 0;
        for name in roster.team_names() {
            let id = normalize(&name);
            if id.is_empty() || catalog.teams.iter().any(|t| normalize(&t.name) == id) {
                continue;
            }
            catalog
                .teams
                .push(Team::new(&id, &name, DISCOVERED_COLORS.0, DISCOVERED_COLORS.1));
            added += 1;
        }
        if added > 0 {
            tracing::info!("Team catalog: {} clubs added from the dataset", added);
        }
        catalog
    }

    pub fn all(&self) -> &[Team] {
        &self.teams
    }

    pub fn get(&self, id: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.id == id)
    }

    /// Look a team up by id, or stand in a bare one named after the id
    pub fn resolve(&self, id: &str) -> Team {
        match self.get(id) {
            Some(team) => team.clone(),
            None => {
                tracing::warn!("Unknown team id {}, using placeholder", id);
                Team::new(id, id, DISCOVERED_COLORS.0, DISCOVERED_COLORS.1)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}
