//! Match roster: display names, bot/spectator flags and team membership

use crate::domain::error::{EtlError, EtlResult};
use crate::domain::types::PlayerId;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;

/// Display-name prefixes used by broadcast and observer accounts
const OBSERVER_PREFIXES: [&str; 2] = ["BLAST_", "OBS_"];

/// Team membership lookup used to exclude teammates from target inference
pub trait TeamLookup {
    fn team_of(&self, player: &PlayerId) -> Option<u32>;

    /// Both players known and on the same team
    fn same_team(&self, a: &PlayerId, b: &PlayerId) -> bool {
        match (self.team_of(a), self.team_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlayerRecord {
    #[serde(rename = "epicId")]
    epic_id: String,
    #[serde(rename = "epicUsername", default)]
    epic_username: String,
    #[serde(rename = "isBot", default)]
    is_bot: bool,
    #[serde(rename = "isSpectator", default)]
    is_spectator: bool,
    #[serde(rename = "teamIndex", alias = "teamId", default)]
    team: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PlayersPayload {
    players: Vec<PlayerRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub id: PlayerId,
    pub name: String,
    pub is_bot: bool,
    pub is_spectator: bool,
    pub team: Option<u32>,
}

impl RosterEntry {
    /// Bots, spectators and observer accounts never take part in reconstruction
    pub fn is_excluded(&self) -> bool {
        self.is_bot
            || self.is_spectator
            || OBSERVER_PREFIXES.iter().any(|p| self.name.starts_with(p))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: FxHashMap<PlayerId, RosterEntry>,
    /// Payload order, used for stable frame layouts
    order: Vec<PlayerId>,
}

impl Roster {
    pub fn from_entries(entries: impl IntoIterator<Item = RosterEntry>) -> Self {
        let mut roster = Self::default();
        for entry in entries {
            if !roster.entries.contains_key(&entry.id) {
                roster.order.push(entry.id.clone());
            }
            roster.entries.insert(entry.id.clone(), entry);
        }
        roster
    }

    /// Parse the players artifact (`{"players": [...]}`)
    pub fn from_json(payload: &Value) -> EtlResult<Self> {
        let parsed = PlayersPayload::deserialize(payload)
            .map_err(|e| EtlError::MalformedData(format!("players payload: {e}")))?;
        Ok(Self::from_entries(parsed.players.into_iter().map(|p| RosterEntry {
            id: PlayerId(p.epic_id),
            name: p.epic_username,
            is_bot: p.is_bot,
            is_spectator: p.is_spectator,
            team: p.team,
        })))
    }

    pub fn get(&self, id: &PlayerId) -> Option<&RosterEntry> {
        self.entries.get(id)
    }

    pub fn name(&self, id: &PlayerId) -> Option<&str> {
        self.get(id).map(|e| e.name.as_str())
    }

    /// Known and not excluded. Ids absent from the roster are not included.
    pub fn is_included(&self, id: &PlayerId) -> bool {
        self.get(id).is_some_and(|e| !e.is_excluded())
    }

    /// Included entries in payload order
    pub fn included(&self) -> impl Iterator<Item = &RosterEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id)).filter(|e| !e.is_excluded())
    }

    pub fn human_count(&self) -> usize {
        self.included().count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TeamLookup for Roster {
    fn team_of(&self, player: &PlayerId) -> Option<u32> {
        self.entries.get(player).and_then(|e| e.team)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Roster {
        Roster::from_json(&json!({
            "players": [
                {"epicId": "a", "epicUsername": "alpha", "isBot": false, "isSpectator": false, "teamIndex": 3},
                {"epicId": "b", "epicUsername": "bravo", "isBot": true, "isSpectator": false, "teamIndex": 4},
                {"epicId": "c", "epicUsername": "charlie", "isBot": false, "isSpectator": true},
                {"epicId": "d", "epicUsername": "BLAST_cam1", "isBot": false, "isSpectator": false},
                {"epicId": "e", "epicUsername": "OBS_main", "isBot": false, "isSpectator": false},
                {"epicId": "f", "epicUsername": "foxtrot", "isBot": false, "isSpectator": false, "teamId": 3}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_exclusions() {
        let roster = sample();
        assert!(roster.is_included(&PlayerId::new("a")));
        assert!(!roster.is_included(&PlayerId::new("b")));
        assert!(!roster.is_included(&PlayerId::new("c")));
        assert!(!roster.is_included(&PlayerId::new("d")));
        assert!(!roster.is_included(&PlayerId::new("e")));
        assert!(!roster.is_included(&PlayerId::new("unknown")));
        assert_eq!(roster.human_count(), 2);
        assert_eq!(roster.len(), 6);
    }

    #[test]
    fn test_included_keeps_payload_order() {
        let binding = sample();
        let ids: Vec<&str> = binding.included().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "f"]);
    }

    #[test]
    fn test_team_lookup() {
        let roster = sample();
        assert!(roster.same_team(&PlayerId::new("a"), &PlayerId::new("f")));
        assert!(!roster.same_team(&PlayerId::new("a"), &PlayerId::new("b")));
        // unknown team never matches
        assert!(!roster.same_team(&PlayerId::new("c"), &PlayerId::new("d")));
        assert_eq!(roster.name(&PlayerId::new("f")), Some("foxtrot"));
    }

    #[test]
    fn test_missing_players_key_is_malformed() {
        assert!(matches!(
            Roster::from_json(&json!({"nope": []})),
            Err(EtlError::MalformedData(_))
        ));
    }
}
