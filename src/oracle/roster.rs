//! Local player dataset and the string rules used to query it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::{OracleError, OracleResult};

/// Known misspellings in the source data, as (wrong, right)
const TYPO_CORRECTIONS: &[(&str, &str)] = &[("sampdroria", "sampdoria")];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerRecord {
    #[serde(default)]
    pub teams: Vec<String>,
    /// Career entries such as "2005-2007 Fiorentina"
    #[serde(default)]
    pub history: Vec<String>,
}

/// A player that satisfied a lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMatch {
    pub canonical_name: String,
    pub history: Vec<String>,
}

/// Player name (lowercase) to career record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    players: BTreeMap<String, PlayerRecord>,
}

/// Lowercase, alphanumerics only, known typos fixed
pub fn normalize(input: &str) -> String {
    let mut clean: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    for (wrong, right) in TYPO_CORRECTIONS {
        if clean.contains(wrong) {
            clean = clean.replace(wrong, right);
        }
    }
    clean
}

/// Fix known typos in display text, keeping the surrounding text untouched
pub fn correct_typos(text: &str) -> String {
    let mut out = text.to_string();
    for (wrong, right) in TYPO_CORRECTIONS {
        while let Some(start) = out.to_ascii_lowercase().find(wrong) {
            let end = start + wrong.len();
            let capitalized = out[start..].starts_with(|c: char| c.is_ascii_uppercase());
            let replacement = if capitalized {
                title_case(right)
            } else {
                right.to_string()
            };
            out.replace_range(start..end, &replacement);
        }
    }
    out
}

pub fn title_case(input: &str) -> String {
    input
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exact name, surname or any single word of the stored name
fn name_matches(stored: &str, input: &str) -> bool {
    let stored = stored.to_lowercase();
    if stored == input {
        return true;
    }
    let words: Vec<&str> = stored.split_whitespace().collect();
    words.last().is_some_and(|surname| *surname == input) || words.iter().any(|w| *w == input)
}

impl PlayerRecord {
    fn played_for(&self, team: &str) -> bool {
        self.teams.iter().any(|t| normalize(t).contains(team))
    }

    /// Crossover for two clubs, one-club career when both are the same
    fn satisfies(&self, team_a: &str, team_b: &str) -> bool {
        if team_a.is_empty() || team_b.is_empty() {
            return false;
        }
        if team_a == team_b {
            return !self.teams.is_empty() && self.teams.iter().all(|t| normalize(t).contains(team_a));
        }
        self.played_for(team_a) && self.played_for(team_b)
    }

    /// Entries mentioning either club, typo-corrected for display
    fn relevant_history(&self, team_a: &str, team_b: &str) -> Vec<String> {
        self.history
            .iter()
            .filter(|entry| {
                let entry = normalize(entry);
                entry.contains(team_a) || entry.contains(team_b)
            })
            .map(|entry| correct_typos(entry))
            .collect()
    }
}

impl Roster {
    pub fn from_json(json: &str) -> OracleResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> OracleResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| OracleError::Dataset(format!("{}: {}", path.display(), e)))?;
        let roster = Self::from_json(&json)?;
        tracing::info!("Loaded {} players from {}", roster.len(), path.display());
        Ok(roster)
    }

    /// A missing or broken dataset yields an empty roster
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(roster) => roster,
            Err(e) => {
                tracing::warn!("Player dataset unavailable, continuing without it: {}", e);
                Self::default()
            }
        }
    }

    pub fn insert(&mut self, name: &str, record: PlayerRecord) {
        self.players.insert(name.to_lowercase(), record);
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Every player satisfying the relation, title-cased and sorted
    pub fn enumerate(&self, team_a: &str, team_b: &str) -> Vec<String> {
        let (a, b) = (normalize(team_a), normalize(team_b));
        let mut names: Vec<String> = self
            .players
            .iter()
            .filter(|(_, record)| record.satisfies(&a, &b))
            .map(|(name, _)| title_case(name))
            .collect();
        names.sort();
        names
    }

    /// First stored player whose name matches `candidate` and who satisfies the relation
    pub fn verify(&self, team_a: &str, team_b: &str, candidate: &str) -> Option<LocalMatch> {
        let input = candidate.trim().to_lowercase();
        if input.is_empty() {
            return None;
        }
        let (a, b) = (normalize(team_a), normalize(team_b));

        self.players
            .iter()
            .filter(|(name, _)| name_matches(name, &input))
            .find(|(_, record)| record.satisfies(&a, &b))
            .map(|(name, record)| LocalMatch {
                canonical_name: title_case(name),
                history: record.relevant_history(&a, &b),
            })
    }

    /// Distinct club names mentioned anywhere in the dataset
    pub fn team_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for record in self.players.values() {
            for team in &record.teams {
                let key = normalize(team);
                if !key.is_empty() && seen.insert(key) {
                    names.push(correct_typos(team.trim()));
                }
            }
        }
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Roster {
        Roster::from_json(
            r#"{
                "luca toni": {
                    "teams": ["Fiorentina", "Bayern Munich", "Juventus", "Hellas Verona"],
                    "history": ["2005-2007 Fiorentina", "2007-2010 Bayern Munich", "2012-2013 Juventus", "2013-2016 Hellas Verona"]
                },
                "roberto mancini": {
                    "teams": ["Bologna", "Sampdroria", "Lazio"],
                    "history": ["1981-1982 Bologna", "1982-1997 Sampdroria", "1997-2001 Lazio"]
                },
                "francesco totti": {
                    "teams": ["Roma"],
                    "history": ["1992-2017 Roma"]
                },
                "daniele de rossi": {
                    "teams": ["Roma", "Boca Juniors"],
                    "history": ["2001-2019 Roma", "2019-2020 Boca Juniors"]
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Hellas Verona F.C."), "hellasveronafc");
        assert_eq!(normalize("Sampdroria"), "sampdoria");
    }

    #[test]
    fn test_correct_typos_for_display() {
        assert_eq!(correct_typos("1982-1997 Sampdroria"), "1982-1997 Sampdoria");
        assert_eq!(correct_typos("uc sampdroria"), "uc sampdoria");
        assert_eq!(correct_typos("Lazio"), "Lazio");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("daniele de rossi"), "Daniele De Rossi");
    }

    #[test]
    fn test_name_matching_rules() {
        let roster = roster();
        for input in ["toni", "luca", "Luca Toni", "  LUCA TONI "] {
            let found = roster.verify("Fiorentina", "Juventus", input);
            assert_eq!(
                found.map(|m| m.canonical_name),
                Some("Luca Toni".to_string()),
                "input {:?}",
                input
            );
        }
        assert!(roster.verify("Fiorentina", "Juventus", "tony").is_none());
        assert!(roster.verify("Fiorentina", "Juventus", "").is_none());
    }

    #[test]
    fn test_wrong_teams_do_not_match() {
        assert!(roster().verify("Roma", "Juventus", "toni").is_none());
    }

    #[test]
    fn test_history_only_mentions_requested_teams() {
        let found = roster().verify("Fiorentina", "Verona", "toni").unwrap();
        assert_eq!(
            found.history,
            vec!["2005-2007 Fiorentina", "2013-2016 Hellas Verona"]
        );
    }

    #[test]
    fn test_history_applies_typo_correction() {
        let found = roster().verify("Sampdoria", "Lazio", "mancini").unwrap();
        assert_eq!(
            found.history,
            vec!["1982-1997 Sampdoria", "1997-2001 Lazio"]
        );
    }

    #[test]
    fn test_enumerate_crossover() {
        let roster = roster();
        assert_eq!(roster.enumerate("juventus", "FIORENTINA"), vec!["Luca Toni"]);
        assert_eq!(roster.enumerate("Sampdoria", "Bologna"), vec!["Roberto Mancini"]);
        assert!(roster.enumerate("Napoli", "Milan").is_empty());
    }

    #[test]
    fn test_same_team_means_one_club_career() {
        let roster = roster();
        assert_eq!(roster.enumerate("Roma", "Roma"), vec!["Francesco Totti"]);
        assert!(roster.verify("Roma", "Roma", "rossi").is_none());
        assert!(roster.verify("Roma", "Roma", "totti").is_some());
    }

    #[test]
    fn test_team_names_are_distinct() {
        let names = roster().team_names();
        assert!(names.contains(&"Sampdoria".to_string()));
        assert_eq!(names.iter().filter(|n| n.as_str() == "Roma").count(), 1);
    }

    #[test]
    fn test_missing_file_is_empty_roster() {
        let roster = Roster::load_or_empty("/definitely/not/here.json");
        assert!(roster.is_empty());
        assert!(roster.enumerate("Roma", "Lazio").is_empty());
    }
}
