//! Event reconstruction - merge, replay and combat event building
//!
//! This module turns one match's independently timestamped logs into:
//! - `merge_timeline` - a single chronological stream of `RawEvent`
//! - `replay` - fixed-rate per-player state frames (see `replay`)
//! - `Reconstructor::build_combat_events` - damage, hit-attempt and elimination records
//!
//! Submodules:
//! - `parse` - wire payloads to typed logs
//! - `replay` - state table and frame stream

pub mod parse;
pub mod replay;

pub use parse::{MatchInfo, MatchLogs, WeaponCatalog};
pub use replay::{replay, FrameStream, Replay, StateTable};

use crate::domain::combat::{CombatEvent, CombatKind};
use crate::domain::error::{EtlError, EtlResult};
use crate::domain::geometry::Vec3;
use crate::domain::types::{MovementEvent, PlayerId, RawEvent, ShotEvent, Timestamp};
use crate::infra::metrics::PipelineMetrics;
use crate::io::roster::Roster;
use crate::services::target_inference::{Candidate, Inference, TargetInference};
use crate::services::temporal_index::TemporalIndex;
use crate::services::zone_timeline::ZoneTimeline;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Merge every log into one chronological stream.
///
/// The sort is stable and logs are appended in a fixed order, so at equal
/// timestamps movement precedes shots, which precede knocks, eliminations,
/// health, shield, revive, reboot and zone updates.
pub fn merge_timeline(logs: &MatchLogs) -> Vec<RawEvent> {
    let mut merged = Vec::with_capacity(logs.total());
    merged.extend(logs.movement.iter().cloned().map(RawEvent::Movement));
    merged.extend(logs.shots.iter().cloned().map(RawEvent::Shot));
    merged.extend(logs.knocks.iter().cloned().map(RawEvent::Knock));
    merged.extend(logs.eliminations.iter().cloned().map(RawEvent::Elimination));
    merged.extend(logs.health.iter().cloned().map(RawEvent::HealthUpdate));
    merged.extend(logs.shield.iter().cloned().map(RawEvent::ShieldUpdate));
    merged.extend(logs.revives.iter().cloned().map(RawEvent::Revive));
    merged.extend(logs.reboots.iter().cloned().map(RawEvent::Reboot));
    merged.extend(logs.zones.iter().cloned().map(RawEvent::ZonePhase));
    merged.sort_by_key(RawEvent::timestamp);
    merged
}

/// Movement lookup with fallback to a position embedded in the event itself
struct Positions<'a> {
    index: TemporalIndex<&'a MovementEvent>,
}

impl<'a> Positions<'a> {
    fn new(movement: &'a [MovementEvent]) -> Self {
        Self { index: TemporalIndex::build(movement, |m| m.player.clone(), |m| m.timestamp) }
    }

    fn at(&self, player: &PlayerId, t: Timestamp, embedded: Option<Vec3>) -> EtlResult<Vec3> {
        match self.index.nearest(player, t) {
            Ok(m) => Ok(m.position),
            Err(e) => embedded.ok_or(e),
        }
    }

    /// Positions of every player in `players` at each of the ascending `refs`
    fn table(&self, players: &[PlayerId], refs: &[Timestamp]) -> Vec<(PlayerId, Vec<Vec3>)> {
        players
            .iter()
            .filter_map(|id| {
                let events = self.index.nearest_batch(id, refs).ok()?;
                Some((id.clone(), events.into_iter().map(|m| m.position).collect()))
            })
            .collect()
    }
}

/// Builds enriched combat events for one match
pub struct Reconstructor {
    inference: TargetInference,
    metrics: Arc<PipelineMetrics>,
}

impl Reconstructor {
    pub fn new(inference: TargetInference, metrics: Arc<PipelineMetrics>) -> Self {
        Self { inference, metrics }
    }

    /// Damage from direct hits, hit attempts inferred for indirect hits, and
    /// eliminations from the elimination log, in timestamp order.
    ///
    /// Events touching an excluded player, self-eliminations and events whose
    /// positions cannot be resolved are skipped. Any error that is not local to
    /// one event fails the whole match.
    pub fn build_combat_events(
        &self,
        logs: &MatchLogs,
        roster: &Roster,
        zones: &ZoneTimeline,
        weapons: Option<&WeaponCatalog>,
    ) -> EtlResult<Vec<CombatEvent>> {
        let positions = Positions::new(&logs.movement);
        let weapon_type = |id: &str| -> Option<String> {
            weapons.and_then(|w| w.weapon_type(id)).map(str::to_string)
        };

        let mut events = Vec::new();
        let mut indirect: Vec<&ShotEvent> = Vec::new();

        for shot in &logs.shots {
            self.metrics.record_shot_evaluated();
            if !roster.is_included(&shot.player) {
                continue;
            }
            let Some(target) = &shot.hit_player else {
                indirect.push(shot);
                continue;
            };
            if !roster.is_included(target) {
                continue;
            }
            let resolved = positions.at(&shot.player, shot.timestamp, None).and_then(|actor| {
                positions.at(target, shot.timestamp, Some(shot.impact)).map(|r| (actor, r))
            });
            let (actor_position, recipient_position) = match resolved {
                Ok(p) => p,
                Err(e) => {
                    self.skip_unresolved("damage", &shot.player, shot.timestamp, e)?;
                    continue;
                }
            };
            events.push(CombatEvent {
                kind: CombatKind::Damage,
                timestamp: shot.timestamp,
                zone: zones.zone_for(shot.timestamp),
                weapon_id: shot.weapon_id.clone(),
                weapon_type: weapon_type(&shot.weapon_id),
                actor_id: shot.player.clone(),
                recipient_id: target.clone(),
                actor_position,
                recipient_position,
                distance: actor_position.distance(recipient_position),
                damage: shot.damage,
            });
        }

        events.extend(self.hit_attempts(&indirect, &positions, roster, zones, &weapon_type)?);

        for elim in &logs.eliminations {
            if elim.self_elimination
                || elim.actor == elim.target
                || !roster.is_included(&elim.actor)
                || !roster.is_included(&elim.target)
            {
                continue;
            }
            let resolved = positions
                .at(&elim.actor, elim.timestamp, elim.actor_position)
                .and_then(|a| positions.at(&elim.target, elim.timestamp, elim.target_position).map(|r| (a, r)));
            let (actor_position, recipient_position) = match resolved {
                Ok(p) => p,
                Err(e) => {
                    self.skip_unresolved("elimination", &elim.actor, elim.timestamp, e)?;
                    continue;
                }
            };
            events.push(CombatEvent {
                kind: CombatKind::Elimination,
                timestamp: elim.timestamp,
                zone: zones.zone_for(elim.timestamp),
                weapon_id: elim.weapon_id.clone(),
                weapon_type: weapon_type(&elim.weapon_id),
                actor_id: elim.actor.clone(),
                recipient_id: elim.target.clone(),
                actor_position,
                recipient_position,
                distance: actor_position.distance(recipient_position),
                damage: None,
            });
        }

        events.sort_by_key(|e| e.timestamp);
        info!(
            combat_events = %events.len(),
            indirect_shots = %indirect.len(),
            "combat_events_built"
        );
        Ok(events)
    }

    fn hit_attempts(
        &self,
        shots: &[&ShotEvent],
        positions: &Positions<'_>,
        roster: &Roster,
        zones: &ZoneTimeline,
        weapon_type: &dyn Fn(&str) -> Option<String>,
    ) -> EtlResult<Vec<CombatEvent>> {
        let mut shots = shots.to_vec();
        shots.sort_by_key(|s| s.timestamp);
        let refs: Vec<Timestamp> = shots.iter().map(|s| s.timestamp).collect();
        let players: Vec<PlayerId> = positions
            .index
            .entities()
            .into_iter()
            .filter(|id| roster.is_included(id))
            .cloned()
            .collect();
        let table = positions.table(&players, &refs);

        let mut out = Vec::new();
        for (i, shot) in shots.iter().enumerate() {
            let origin = match positions.at(&shot.player, shot.timestamp, None) {
                Ok(p) => p,
                Err(e) => {
                    self.skip_unresolved("hit_attempt", &shot.player, shot.timestamp, e)?;
                    continue;
                }
            };
            let candidates: Vec<Candidate> = table
                .iter()
                .map(|(id, pos)| Candidate { id: id.clone(), position: pos[i] })
                .collect();

            match self.inference.infer(shot, origin, &candidates, roster) {
                Ok(Inference::Hit { target, position, distance }) => {
                    self.metrics.record_hit_attempt();
                    out.push(CombatEvent {
                        kind: CombatKind::HitAttempt,
                        timestamp: shot.timestamp,
                        zone: zones.zone_for(shot.timestamp),
                        weapon_id: shot.weapon_id.clone(),
                        weapon_type: weapon_type(&shot.weapon_id),
                        actor_id: shot.player.clone(),
                        recipient_id: target,
                        actor_position: origin,
                        recipient_position: position,
                        distance,
                        damage: None,
                    });
                }
                Ok(Inference::Stray) => self.metrics.record_stray_shot(),
                Ok(Inference::Direct) => {}
                Err(e) if e.is_event_local() => {
                    if matches!(e, EtlError::DegenerateGeometry(_)) {
                        self.metrics.record_degenerate_shot();
                    }
                    debug!(
                        shooter = %shot.player,
                        timestamp = %shot.timestamp,
                        error = %e,
                        "indirect_shot_discarded"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Skip an event whose positions cannot be resolved; other errors propagate
    fn skip_unresolved(
        &self,
        kind: &str,
        player: &PlayerId,
        ts: Timestamp,
        err: EtlError,
    ) -> EtlResult<()> {
        if !err.is_event_local() {
            return Err(err);
        }
        self.metrics.record_unresolved_position();
        warn!(
            kind = %kind,
            player = %player,
            timestamp = %ts,
            error = %err,
            "combat_event_position_unresolved"
        );
        Ok(())
    }
}
