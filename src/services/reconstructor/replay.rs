//! Merged-stream replay into fixed-rate state frames
//!
//! State lives in a `StateTable` owned by one frame stream. Frames are
//! produced lazily; calling `Replay::frames` again restarts from the first tick.

use crate::domain::combat::{Frame, PlayerState};
use crate::domain::geometry::Vec3;
use crate::domain::types::{PlayerId, RawEvent, Timestamp};
use crate::io::roster::Roster;
use rustc_hash::FxHashMap;

const MICROS_PER_SEC: i128 = 1_000_000;

/// Per-entity state for the included players, indexed by slot
#[derive(Debug, Clone)]
pub struct StateTable {
    slots: FxHashMap<PlayerId, usize>,
    states: Vec<PlayerState>,
}

impl StateTable {
    pub fn new(players: &[PlayerId], origin: Vec3) -> Self {
        let slots = players.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        Self { slots, states: vec![PlayerState::spawn(origin); players.len()] }
    }

    fn slot_mut(&mut self, player: &PlayerId) -> Option<&mut PlayerState> {
        let idx = *self.slots.get(player)?;
        self.states.get_mut(idx)
    }

    /// Apply one event. Events for untracked players are ignored.
    pub fn apply(&mut self, event: &RawEvent) {
        match event {
            RawEvent::Movement(m) => {
                if let Some(s) = self.slot_mut(&m.player) {
                    s.position = m.position;
                    s.yaw = m.yaw;
                }
            }
            RawEvent::HealthUpdate(u) => {
                if let Some(s) = self.slot_mut(&u.player) {
                    s.health = u.value;
                }
            }
            RawEvent::ShieldUpdate(u) => {
                if let Some(s) = self.slot_mut(&u.player) {
                    s.shield = u.value;
                }
            }
            RawEvent::Knock(k) => {
                if let Some(s) = self.slot_mut(&k.target) {
                    s.knocked = true;
                }
            }
            RawEvent::Elimination(e) => {
                if let Some(s) = self.slot_mut(&e.target) {
                    s.eliminate();
                }
            }
            RawEvent::Revive(r) | RawEvent::Reboot(r) => {
                if let Some(s) = self.slot_mut(&r.player) {
                    s.restore();
                }
            }
            RawEvent::Shot(_) | RawEvent::ZonePhase(_) => {}
        }
    }

    pub fn snapshot(&self) -> Vec<PlayerState> {
        self.states.clone()
    }
}

/// A replay plan over one merged stream
#[derive(Debug, Clone)]
pub struct Replay<'a> {
    events: &'a [RawEvent],
    players: Vec<PlayerId>,
    origin_ts: Timestamp,
    sample_hz: u32,
}

/// Prepare a replay of `merged` (chronological) sampled at `sample_hz` from `origin_ts`.
///
/// Only players the roster includes get a state slot; events whose subject is
/// anyone else, and zone updates, are skipped entirely. The stream ends at the
/// last event of an included player.
pub fn replay<'a>(
    merged: &'a [RawEvent],
    roster: &Roster,
    origin_ts: Timestamp,
    sample_hz: u32,
) -> Replay<'a> {
    Replay {
        events: merged,
        players: roster.included().map(|e| e.id.clone()).collect(),
        origin_ts,
        sample_hz: sample_hz.max(1),
    }
}

impl<'a> Replay<'a> {
    /// Slot order of `Frame::states`
    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    pub fn sample_hz(&self) -> u32 {
        self.sample_hz
    }

    pub fn frames(&self) -> FrameStream<'a> {
        FrameStream {
            events: self.events,
            pos: 0,
            table: StateTable::new(&self.players, Vec3::ZERO),
            origin_ts: self.origin_ts,
            sample_hz: self.sample_hz,
            tick: 0,
        }
    }
}

pub struct FrameStream<'a> {
    events: &'a [RawEvent],
    pos: usize,
    table: StateTable,
    origin_ts: Timestamp,
    sample_hz: u32,
    tick: u64,
}

impl FrameStream<'_> {
    /// Integer tick time, no accumulated float drift
    #[inline]
    fn tick_time(&self, tick: u64) -> Timestamp {
        let offset = tick as i128 * MICROS_PER_SEC / self.sample_hz as i128;
        self.origin_ts + offset as i64
    }

    /// Events without a subject (zone updates) change no state and never drive frames
    fn is_tracked(&self, event: &RawEvent) -> bool {
        event.subject().is_some_and(|player| self.table.slots.contains_key(player))
    }
}

impl Iterator for FrameStream<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        while let Some(event) = self.events.get(self.pos) {
            if !self.is_tracked(event) {
                self.pos += 1;
                continue;
            }
            let tick_time = self.tick_time(self.tick);
            if tick_time <= event.timestamp() {
                let frame = Frame { tick: self.tick, timestamp: tick_time, states: self.table.snapshot() };
                self.tick += 1;
                return Some(frame);
            }
            self.table.apply(event);
            self.pos += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{
        EliminationEvent, KnockEvent, MovementEvent, Restore, StatUpdate, ZonePhase,
    };
    use crate::io::roster::RosterEntry;

    fn roster(ids: &[(&str, bool)]) -> Roster {
        Roster::from_entries(ids.iter().map(|(id, bot)| RosterEntry {
            id: PlayerId::new(*id),
            name: id.to_string(),
            is_bot: *bot,
            is_spectator: false,
            team: None,
        }))
    }

    fn movement(id: &str, ts: Timestamp, x: f64) -> RawEvent {
        RawEvent::Movement(MovementEvent {
            player: PlayerId::new(id),
            timestamp: ts,
            position: Vec3::new(x, 0.0, 0.0),
            yaw: 45.0,
        })
    }

    fn elimination(actor: &str, target: &str, ts: Timestamp) -> RawEvent {
        RawEvent::Elimination(EliminationEvent {
            actor: PlayerId::new(actor),
            target: PlayerId::new(target),
            timestamp: ts,
            weapon_id: "ar".into(),
            actor_position: None,
            target_position: None,
            self_elimination: false,
        })
    }

    #[test]
    fn test_elimination_between_ticks() {
        // 10 Hz: ticks at 0, 100_000, 200_000 ...
        let events = vec![
            movement("a", 0, 1.0),
            movement("b", 0, 2.0),
            elimination("a", "b", 150_000),
            movement("a", 300_000, 5.0),
        ];
        let r = roster(&[("a", false), ("b", false)]);
        let replay = replay(&events, &r, 0, 10);
        let frames: Vec<Frame> = replay.frames().collect();

        let b = 1;
        assert_eq!(replay.players()[b], PlayerId::new("b"));
        let at = |ts: Timestamp| frames.iter().find(|f| f.timestamp == ts).unwrap();
        assert!(at(100_000).states[b].alive);
        assert!(!at(200_000).states[b].alive);
        assert_eq!(at(200_000).states[b].health, 0.0);
        assert_eq!(at(200_000).states[b].shield, 0.0);
        assert!(!at(200_000).states[b].knocked);
    }

    #[test]
    fn test_frames_emitted_up_to_last_event() {
        let events = vec![movement("a", 0, 1.0), movement("a", 250_000, 2.0)];
        let r = roster(&[("a", false)]);
        let frames: Vec<Frame> = replay(&events, &r, 0, 10).frames().collect();
        let ticks: Vec<Timestamp> = frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(ticks, vec![0, 100_000, 200_000]);
        // frame at tick 0 is taken before the movement at ts 0 is applied
        assert_eq!(frames[0].states[0].position, Vec3::ZERO);
        assert_eq!(frames[1].states[0].position, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(frames[1].states[0].yaw, 45.0);
    }

    #[test]
    fn test_initial_state_and_stat_updates() {
        let events = vec![
            RawEvent::HealthUpdate(StatUpdate { player: PlayerId::new("a"), timestamp: 50_000, value: 70.0 }),
            RawEvent::ShieldUpdate(StatUpdate { player: PlayerId::new("a"), timestamp: 60_000, value: 40.0 }),
            movement("a", 150_000, 0.0),
        ];
        let r = roster(&[("a", false)]);
        let frames: Vec<Frame> = replay(&events, &r, 0, 10).frames().collect();
        assert_eq!(frames[0].states[0].health, 100.0);
        assert_eq!(frames[0].states[0].shield, 0.0);
        assert!(frames[0].states[0].alive);
        assert_eq!(frames[1].states[0].health, 70.0);
        assert_eq!(frames[1].states[0].shield, 40.0);
    }

    #[test]
    fn test_knock_then_revive() {
        let events = vec![
            RawEvent::Knock(KnockEvent { actor: None, target: PlayerId::new("a"), timestamp: 50_000 }),
            RawEvent::Revive(Restore { player: PlayerId::new("a"), timestamp: 150_000 }),
            movement("a", 250_000, 0.0),
        ];
        let r = roster(&[("a", false)]);
        let frames: Vec<Frame> = replay(&events, &r, 0, 10).frames().collect();
        assert!(frames[1].states[0].knocked);
        assert!(!frames[2].states[0].knocked);
        assert!(frames[2].states[0].alive);
    }

    #[test]
    fn test_bots_excluded_from_state_and_frames() {
        let events = vec![movement("bot", 0, 9.0), movement("a", 100_000, 1.0), movement("bot", 900_000, 9.0)];
        let r = roster(&[("a", false), ("bot", true)]);
        let replay = replay(&events, &r, 0, 10);
        assert_eq!(replay.players(), &[PlayerId::new("a")]);
        let frames: Vec<Frame> = replay.frames().collect();
        assert!(frames.iter().all(|f| f.states.len() == 1));
        // trailing bot event does not extend the stream
        assert_eq!(frames.last().unwrap().timestamp, 100_000);
    }

    #[test]
    fn test_trailing_zone_update_does_not_extend_stream() {
        let events = vec![
            movement("a", 0, 1.0),
            movement("a", 200_000, 2.0),
            RawEvent::ZonePhase(ZonePhase { phase: 12, shrink_end: 5_000_000, timestamp: 5_000_000 }),
        ];
        let r = roster(&[("a", false)]);
        let frames: Vec<Frame> = replay(&events, &r, 0, 10).frames().collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames.last().unwrap().timestamp, 200_000);
    }

    #[test]
    fn test_frames_restartable() {
        let events = vec![movement("a", 0, 1.0), movement("a", 500_000, 2.0)];
        let r = roster(&[("a", false)]);
        let replay = replay(&events, &r, 0, 20);
        let first: Vec<Frame> = replay.frames().collect();
        let second: Vec<Frame> = replay.frames().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 11);
    }

    #[test]
    fn test_origin_offsets_ticks() {
        let events = vec![movement("a", 1_000_000, 1.0), movement("a", 1_100_000, 2.0)];
        let r = roster(&[("a", false)]);
        let frames: Vec<Frame> = replay(&events, &r, 1_000_000, 20).frames().collect();
        assert_eq!(frames.first().unwrap().timestamp, 1_000_000);
        assert_eq!(frames.last().unwrap().timestamp, 1_100_000);
        assert_eq!(frames.len(), 3);
    }
}
