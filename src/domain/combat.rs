//! Reconstructed combat records and replay state frames

use crate::domain::geometry::Vec3;
use crate::domain::types::{PlayerId, Timestamp};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatKind {
    /// Shot that registered directly against a player
    Damage,
    /// Shot against terrain or a structure, recipient inferred geometrically
    HitAttempt,
    Elimination,
}

impl CombatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombatKind::Damage => "damage",
            CombatKind::HitAttempt => "hit_attempt",
            CombatKind::Elimination => "elimination",
        }
    }
}

/// A time- and zone-resolved damage, hit-attempt or elimination record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombatEvent {
    pub kind: CombatKind,
    pub timestamp: Timestamp,
    pub zone: u8,
    pub weapon_id: String,
    pub weapon_type: Option<String>,
    pub actor_id: PlayerId,
    pub recipient_id: PlayerId,
    pub actor_position: Vec3,
    pub recipient_position: Vec3,
    /// Euclidean distance between the two positions (cm)
    pub distance: f64,
    /// Absent for hit attempts
    pub damage: Option<f64>,
}

impl CombatEvent {
    /// Seconds elapsed since `match_start` (µs on the same clock)
    pub fn game_time_seconds(&self, match_start: Timestamp) -> f64 {
        (self.timestamp - match_start) as f64 / 1_000_000.0
    }
}

pub const DEFAULT_HEALTH: f64 = 100.0;

/// Per-entity replay state
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlayerState {
    pub position: Vec3,
    pub yaw: f64,
    pub health: f64,
    pub shield: f64,
    pub alive: bool,
    pub knocked: bool,
}

impl PlayerState {
    pub fn spawn(origin: Vec3) -> Self {
        Self {
            position: origin,
            yaw: 0.0,
            health: DEFAULT_HEALTH,
            shield: 0.0,
            alive: true,
            knocked: false,
        }
    }

    pub fn eliminate(&mut self) {
        self.health = 0.0;
        self.shield = 0.0;
        self.alive = false;
        self.knocked = false;
    }

    pub fn restore(&mut self) {
        self.alive = true;
        self.knocked = false;
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::spawn(Vec3::ZERO)
    }
}

/// Snapshot of every tracked entity at one sample tick.
///
/// `states` is in the same order as the replay's player index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub tick: u64,
    pub timestamp: Timestamp,
    pub states: Vec<PlayerState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_defaults() {
        let state = PlayerState::spawn(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(state.health, 100.0);
        assert_eq!(state.shield, 0.0);
        assert!(state.alive);
        assert!(!state.knocked);
        assert_eq!(state.position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_eliminate_then_restore() {
        let mut state = PlayerState::default();
        state.shield = 50.0;
        state.knocked = true;
        state.eliminate();
        assert_eq!(state.health, 0.0);
        assert_eq!(state.shield, 0.0);
        assert!(!state.alive);
        assert!(!state.knocked);

        state.restore();
        assert!(state.alive);
        assert!(!state.knocked);
    }

    #[test]
    fn test_game_time_seconds() {
        let event = CombatEvent {
            kind: CombatKind::Damage,
            timestamp: 3_500_000,
            zone: 1,
            weapon_id: "ar".into(),
            weapon_type: None,
            actor_id: PlayerId::new("a"),
            recipient_id: PlayerId::new("b"),
            actor_position: Vec3::ZERO,
            recipient_position: Vec3::ZERO,
            distance: 0.0,
            damage: Some(20.0),
        };
        assert!((event.game_time_seconds(1_000_000) - 2.5).abs() < 1e-9);
    }
}
