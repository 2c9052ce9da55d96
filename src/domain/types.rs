//! Shared identifier and raw event types

use crate::domain::geometry::Vec3;
use serde::{Deserialize, Serialize};

/// Newtype wrapper for player (entity) IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Newtype wrapper for match IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub String);

impl MatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Newtype wrapper for event window (tournament stage) IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub String);

impl WindowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Match clock timestamp in microseconds
pub type Timestamp = i64;

/// Source log of a raw event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogKind {
    Movement,
    Shot,
    Knock,
    Elimination,
    HealthUpdate,
    ShieldUpdate,
    Revive,
    Reboot,
    ZonePhase,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Movement => "movement",
            LogKind::Shot => "shot",
            LogKind::Knock => "knock",
            LogKind::Elimination => "elimination",
            LogKind::HealthUpdate => "health_update",
            LogKind::ShieldUpdate => "shield_update",
            LogKind::Revive => "revive",
            LogKind::Reboot => "reboot",
            LogKind::ZonePhase => "zone_phase",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovementEvent {
    pub player: PlayerId,
    pub timestamp: Timestamp,
    pub position: Vec3,
    pub yaw: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShotEvent {
    pub player: PlayerId,
    pub timestamp: Timestamp,
    pub weapon_id: String,
    /// Terminal point of the projectile
    pub impact: Vec3,
    /// Set when the shot registered directly against a player
    pub hit_player: Option<PlayerId>,
    /// Set when the shot registered against a player-built structure
    pub hit_structure: bool,
    pub damage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EliminationEvent {
    pub actor: PlayerId,
    pub target: PlayerId,
    pub timestamp: Timestamp,
    pub weapon_id: String,
    pub actor_position: Option<Vec3>,
    pub target_position: Option<Vec3>,
    pub self_elimination: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnockEvent {
    pub actor: Option<PlayerId>,
    pub target: PlayerId,
    pub timestamp: Timestamp,
}

/// Health or shield value change
#[derive(Debug, Clone, PartialEq)]
pub struct StatUpdate {
    pub player: PlayerId,
    pub timestamp: Timestamp,
    pub value: f64,
}

/// Revive or reboot of a player
#[derive(Debug, Clone, PartialEq)]
pub struct Restore {
    pub player: PlayerId,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZonePhase {
    pub phase: u32,
    pub shrink_end: Timestamp,
    pub timestamp: Timestamp,
}

/// A parsed log record, one payload shape per source log
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    Movement(MovementEvent),
    Shot(ShotEvent),
    Knock(KnockEvent),
    Elimination(EliminationEvent),
    HealthUpdate(StatUpdate),
    ShieldUpdate(StatUpdate),
    Revive(Restore),
    Reboot(Restore),
    ZonePhase(ZonePhase),
}

impl RawEvent {
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        match self {
            RawEvent::Movement(e) => e.timestamp,
            RawEvent::Shot(e) => e.timestamp,
            RawEvent::Knock(e) => e.timestamp,
            RawEvent::Elimination(e) => e.timestamp,
            RawEvent::HealthUpdate(e) | RawEvent::ShieldUpdate(e) => e.timestamp,
            RawEvent::Revive(e) | RawEvent::Reboot(e) => e.timestamp,
            RawEvent::ZonePhase(e) => e.timestamp,
        }
    }

    pub fn kind(&self) -> LogKind {
        match self {
            RawEvent::Movement(_) => LogKind::Movement,
            RawEvent::Shot(_) => LogKind::Shot,
            RawEvent::Knock(_) => LogKind::Knock,
            RawEvent::Elimination(_) => LogKind::Elimination,
            RawEvent::HealthUpdate(_) => LogKind::HealthUpdate,
            RawEvent::ShieldUpdate(_) => LogKind::ShieldUpdate,
            RawEvent::Revive(_) => LogKind::Revive,
            RawEvent::Reboot(_) => LogKind::Reboot,
            RawEvent::ZonePhase(_) => LogKind::ZonePhase,
        }
    }

    /// The entity whose state this event changes (None for match-wide events)
    pub fn subject(&self) -> Option<&PlayerId> {
        match self {
            RawEvent::Movement(e) => Some(&e.player),
            RawEvent::Shot(e) => Some(&e.player),
            RawEvent::Knock(e) => Some(&e.target),
            RawEvent::Elimination(e) => Some(&e.target),
            RawEvent::HealthUpdate(e) | RawEvent::ShieldUpdate(e) => Some(&e.player),
            RawEvent::Revive(e) | RawEvent::Reboot(e) => Some(&e.player),
            RawEvent::ZonePhase(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_of_elimination_is_target() {
        let event = RawEvent::Elimination(EliminationEvent {
            actor: PlayerId::new("a"),
            target: PlayerId::new("b"),
            timestamp: 10,
            weapon_id: "rifle".to_string(),
            actor_position: None,
            target_position: None,
            self_elimination: false,
        });
        assert_eq!(event.subject(), Some(&PlayerId::new("b")));
        assert_eq!(event.kind(), LogKind::Elimination);
        assert_eq!(event.timestamp(), 10);
    }

    #[test]
    fn test_zone_phase_has_no_subject() {
        let event = RawEvent::ZonePhase(ZonePhase { phase: 1, shrink_end: 100, timestamp: 5 });
        assert!(event.subject().is_none());
        assert_eq!(event.kind().as_str(), "zone_phase");
    }
}
