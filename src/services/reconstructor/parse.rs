//! Wire payloads to typed logs
//!
//! Each list entry is decoded on its own; a malformed entry is skipped with a
//! warning instead of failing the whole match. A missing top-level list the
//! match cannot do without is `MissingData`.

use crate::domain::error::{EtlError, EtlResult};
use crate::domain::geometry::Vec3;
use crate::domain::types::{
    EliminationEvent, KnockEvent, LogKind, MovementEvent, PlayerId, Restore, ShotEvent, StatUpdate,
    Timestamp, ZonePhase,
};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Weapon categories that are not guns
const NON_WEAPON_TYPES: [&str; 8] = [
    "PICKAXE",
    "BUILDING",
    "LOOT",
    "SHIELD_HEAL",
    "EDIT_TOOL",
    "MOVEMENT",
    "HEALTH_HEAL",
    "BOTH_HEAL",
];

/// Integer or floating microsecond timestamp
#[derive(Deserialize)]
#[serde(untagged)]
enum Micros {
    Int(i64),
    Float(f64),
}

impl From<Micros> for Timestamp {
    fn from(m: Micros) -> Self {
        match m {
            Micros::Int(v) => v,
            Micros::Float(v) => v.round() as i64,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMovementData {
    location: Vec3,
    #[serde(default)]
    rotation_yaw: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMovement {
    epic_id: String,
    timestamp: Micros,
    movement_data: WireMovementData,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireShot {
    epic_id: String,
    timestamp: Micros,
    #[serde(default)]
    weapon_id: String,
    location: Vec3,
    #[serde(default)]
    hit_player: bool,
    #[serde(default)]
    hit_epic_id: Option<String>,
    #[serde(default)]
    hit_player_build: bool,
    #[serde(default)]
    damage: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireElimination {
    epic_id: String,
    target_id: String,
    timestamp: Micros,
    #[serde(default)]
    gun_type: String,
    #[serde(default)]
    player_location: Option<Vec3>,
    #[serde(default)]
    target_location: Option<Vec3>,
    #[serde(default)]
    self_elimination: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireKnock {
    #[serde(default)]
    epic_id: Option<String>,
    target_id: String,
    timestamp: Micros,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStat {
    epic_id: String,
    timestamp: Micros,
    value: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRestore {
    epic_id: String,
    /// Player brought back, when the log names them separately from the actor
    #[serde(default)]
    target_id: Option<String>,
    timestamp: Micros,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireZone {
    current_phase: u32,
    shrink_end_time: Micros,
    #[serde(default)]
    timestamp: Option<Micros>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMatchInfo {
    #[serde(default)]
    match_id: Option<String>,
    start_timestamp: Micros,
    #[serde(default)]
    end_timestamp: Option<Micros>,
    #[serde(default)]
    aircraft_start_time: Option<Micros>,
    #[serde(default, alias = "gameMode", alias = "playlist")]
    mode: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireWeapon {
    weapon_id: String,
    #[serde(default)]
    weapon_type: Option<String>,
}

/// Every typed log of one match
#[derive(Debug, Clone, Default)]
pub struct MatchLogs {
    pub movement: Vec<MovementEvent>,
    pub shots: Vec<ShotEvent>,
    pub knocks: Vec<KnockEvent>,
    pub eliminations: Vec<EliminationEvent>,
    pub health: Vec<StatUpdate>,
    pub shield: Vec<StatUpdate>,
    pub revives: Vec<Restore>,
    pub reboots: Vec<Restore>,
    pub zones: Vec<ZonePhase>,
    /// Entries dropped because they failed to decode
    pub skipped: usize,
}

impl MatchLogs {
    /// Decode the movement, shot and general-events artifacts
    pub fn from_artifacts(movement: &Value, shots: &Value, events: &Value) -> EtlResult<Self> {
        let mut logs = MatchLogs::default();

        let movement_items = movement_entries(movement)?;
        logs.movement = decode_list(
            movement_items,
            LogKind::Movement.as_str(),
            &mut logs.skipped,
            |w: WireMovement| {
                Ok(MovementEvent {
                    player: PlayerId(w.epic_id),
                    timestamp: w.timestamp.into(),
                    position: w.movement_data.location,
                    yaw: w.movement_data.rotation_yaw,
                })
            },
        );

        let shot_items = required_list(shots, "hitscanEvents")?;
        let shot_log = LogKind::Shot.as_str();
        logs.shots = decode_list(shot_items, shot_log, &mut logs.skipped, |w: WireShot| {
            let hit_player = match (w.hit_player, w.hit_epic_id) {
                (true, Some(id)) => Some(PlayerId(id)),
                (true, None) => return Err("hitPlayer set without hitEpicId".to_string()),
                (false, _) => None,
            };
            Ok(ShotEvent {
                player: PlayerId(w.epic_id),
                timestamp: w.timestamp.into(),
                weapon_id: w.weapon_id,
                impact: w.location,
                hit_player,
                hit_structure: w.hit_player_build,
                damage: w.damage,
            })
        });

        let zones = required_list(events, "safeZoneUpdateEvents")?;
        let zone_log = LogKind::ZonePhase.as_str();
        logs.zones = decode_list(zones, zone_log, &mut logs.skipped, |w: WireZone| {
            let shrink_end: Timestamp = w.shrink_end_time.into();
            Ok(ZonePhase {
                phase: w.current_phase,
                shrink_end,
                timestamp: w.timestamp.map(Into::into).unwrap_or(shrink_end),
            })
        });

        logs.eliminations = decode_list(
            optional_list(events, "eliminationEvents"),
            LogKind::Elimination.as_str(),
            &mut logs.skipped,
            |w: WireElimination| {
                Ok(EliminationEvent {
                    actor: PlayerId(w.epic_id),
                    target: PlayerId(w.target_id),
                    timestamp: w.timestamp.into(),
                    weapon_id: w.gun_type,
                    actor_position: w.player_location,
                    target_position: w.target_location,
                    self_elimination: w.self_elimination,
                })
            },
        );

        logs.knocks = decode_list(
            optional_list(events, "knockedDownEvents"),
            LogKind::Knock.as_str(),
            &mut logs.skipped,
            |w: WireKnock| {
                Ok(KnockEvent {
                    actor: w.epic_id.map(PlayerId),
                    target: PlayerId(w.target_id),
                    timestamp: w.timestamp.into(),
                })
            },
        );

        let stat = |w: WireStat| {
            Ok(StatUpdate { player: PlayerId(w.epic_id), timestamp: w.timestamp.into(), value: w.value })
        };
        let health = optional_list(events, "healthUpdateEvents");
        logs.health = decode_list(health, LogKind::HealthUpdate.as_str(), &mut logs.skipped, stat);
        let shield = optional_list(events, "shieldUpdateEvents");
        logs.shield = decode_list(shield, LogKind::ShieldUpdate.as_str(), &mut logs.skipped, stat);

        let restore = |w: WireRestore| {
            Ok(Restore {
                player: PlayerId(w.target_id.unwrap_or(w.epic_id)),
                timestamp: w.timestamp.into(),
            })
        };
        let revives = optional_list(events, "reviveEvents");
        logs.revives = decode_list(revives, LogKind::Revive.as_str(), &mut logs.skipped, restore);
        let reboots = optional_list(events, "rebootEvents");
        logs.reboots = decode_list(reboots, LogKind::Reboot.as_str(), &mut logs.skipped, restore);

        debug!(
            movement = %logs.movement.len(),
            shots = %logs.shots.len(),
            eliminations = %logs.eliminations.len(),
            knocks = %logs.knocks.len(),
            zones = %logs.zones.len(),
            skipped = %logs.skipped,
            "match_logs_decoded"
        );
        Ok(logs)
    }

    pub fn total(&self) -> usize {
        self.movement.len()
            + self.shots.len()
            + self.knocks.len()
            + self.eliminations.len()
            + self.health.len()
            + self.shield.len()
            + self.revives.len()
            + self.reboots.len()
            + self.zones.len()
    }
}

/// Movement logs arrive either as a bare array or wrapped as `{"events": [...]}`
fn movement_entries(payload: &Value) -> EtlResult<&[Value]> {
    match payload {
        Value::Array(items) => Ok(items.as_slice()),
        Value::Object(map) => map
            .get("events")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| EtlError::MissingData("movement payload has no events list".into())),
        _ => Err(EtlError::MalformedData("movement payload is neither list nor object".into())),
    }
}

fn required_list<'a>(payload: &'a Value, key: &str) -> EtlResult<&'a [Value]> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| EtlError::MissingData(format!("payload has no '{key}' list")))
}

fn optional_list<'a>(payload: &'a Value, key: &str) -> &'a [Value] {
    payload.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

fn decode_list<W, T>(
    items: &[Value],
    log: &'static str,
    skipped: &mut usize,
    convert: impl Fn(W) -> Result<T, String>,
) -> Vec<T>
where
    W: DeserializeOwned,
{
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let decoded = W::deserialize(item).map_err(|e| e.to_string()).and_then(&convert);
        match decoded {
            Ok(event) => out.push(event),
            Err(reason) => {
                *skipped += 1;
                warn!(log = %log, index = %i, reason = %reason, "malformed_event_skipped");
            }
        }
    }
    out
}

/// Match-level metadata from the info artifact
#[derive(Debug, Clone, PartialEq)]
pub struct MatchInfo {
    pub match_id: Option<String>,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub aircraft_start: Option<Timestamp>,
    pub mode: Option<String>,
}

impl MatchInfo {
    /// Accepts the record either at the top level or nested under `info`
    pub fn from_json(payload: &Value) -> EtlResult<Self> {
        let record = payload.get("info").filter(|v| v.is_object()).unwrap_or(payload);
        let wire = WireMatchInfo::deserialize(record)
            .map_err(|e| EtlError::MalformedData(format!("match info: {e}")))?;
        Ok(Self {
            match_id: wire.match_id,
            start: wire.start_timestamp.into(),
            end: wire.end_timestamp.map(Into::into),
            aircraft_start: wire.aircraft_start_time.map(Into::into),
            mode: wire.mode,
        })
    }

    /// Replay clock origin: aircraft launch when known, else match start
    pub fn replay_origin(&self) -> Timestamp {
        self.aircraft_start.unwrap_or(self.start)
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.end.map(|end| (end - self.start) / 1_000_000)
    }
}

/// Weapon id to weapon category, guns only
#[derive(Debug, Clone, Default)]
pub struct WeaponCatalog {
    types: FxHashMap<String, String>,
}

impl WeaponCatalog {
    pub fn from_json(payload: &Value) -> EtlResult<Self> {
        let items = required_list(payload, "weapons")?;
        let mut skipped = 0;
        let weapons = decode_list(items, "weapon", &mut skipped, |w: WireWeapon| Ok(w));
        let types = weapons
            .into_iter()
            .filter_map(|w| w.weapon_type.map(|t| (w.weapon_id, t)))
            .filter(|(_, t)| !NON_WEAPON_TYPES.contains(&t.as_str()))
            .collect();
        Ok(Self { types })
    }

    pub fn weapon_type(&self, weapon_id: &str) -> Option<&str> {
        self.types.get(weapon_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
