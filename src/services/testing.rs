//! Test doubles and payload fixtures shared by the pipeline tests

use crate::domain::error::{EtlError, EtlResult};
use crate::io::artifacts::ArtifactKind;
use crate::io::fetcher::{ApiRequest, Fetcher};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Fixed match clock origin (µs)
pub const MATCH_START: i64 = 1_700_000_000_000_000;

pub const fn secs(s: i64) -> i64 {
    MATCH_START + s * 1_000_000
}

/// Serves canned payloads keyed by request label; unknown requests are a 404
#[derive(Default)]
pub struct MockFetcher {
    payloads: Mutex<FxHashMap<String, Value>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request: ApiRequest, payload: Value) {
        self.payloads.lock().unwrap().insert(request.label(), payload);
    }

    pub fn remove(&self, request: &ApiRequest) {
        self.payloads.lock().unwrap().remove(&request.label());
    }

    pub fn with_match(self, match_id: &str) -> Self {
        for (kind, payload) in match_payloads(match_id) {
            self.insert(ApiRequest::artifact(kind, match_id), payload);
        }
        self
    }

    pub fn with_window(self, window_id: &str, match_ids: &[&str]) -> Self {
        self.insert(
            ApiRequest::artifact(ArtifactKind::WindowInfo, window_id),
            json!({"tournaments": [{"eventWindowId": window_id}]}),
        );
        self.insert(
            ApiRequest::artifact(ArtifactKind::WindowMatches, window_id),
            window_matches(match_ids),
        );
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &ApiRequest) -> EtlResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().get(&request.label()).cloned().ok_or_else(|| {
            EtlError::Fetch { target: request.label(), reason: "HTTP 404".into(), transient: false }
        })
    }
}

fn movement(id: &str, t: i64, x: f64) -> Value {
    json!({"epicId": id, "timestamp": t,
           "movementData": {"location": {"x": x, "y": 0.0, "z": 0.0}, "rotationYaw": 0.0}})
}

/// One solo match: `a` damages `b`, then an indirect shot toward `b`, then `a` eliminates `b`.
/// A bot stands between them and must never be selected.
pub fn match_payloads(match_id: &str) -> Vec<(ArtifactKind, Value)> {
    let zones: Vec<Value> = (1..=12)
        .map(|k| json!({"currentPhase": k, "shrinkEndTime": secs(120 * k)}))
        .collect();
    vec![
        (
            ArtifactKind::MatchInfo,
            json!({"info": {
                "matchId": match_id,
                "startTimestamp": MATCH_START,
                "endTimestamp": secs(1500),
                "aircraftStartTime": secs(60),
                "gameMode": "solo"
            }}),
        ),
        (
            ArtifactKind::Players,
            json!({"players": [
                {"epicId": "a", "epicUsername": "alpha", "isBot": false, "isSpectator": false, "teamIndex": 1},
                {"epicId": "b", "epicUsername": "bravo", "isBot": false, "isSpectator": false, "teamIndex": 2},
                {"epicId": "bot1", "epicUsername": "bot", "isBot": true, "isSpectator": false, "teamIndex": 3}
            ]}),
        ),
        (
            ArtifactKind::Movement,
            json!({"events": [
                movement("a", secs(60), 0.0),
                movement("b", secs(60), 1000.0),
                movement("bot1", secs(60), 500.0),
                movement("a", secs(61), 0.0),
                movement("b", secs(61), 1000.0)
            ]}),
        ),
        (
            ArtifactKind::Shots,
            json!({"hitscanEvents": [
                {"epicId": "a", "timestamp": secs(61), "weaponId": "ar",
                 "location": {"x": 1000.0, "y": 0.0, "z": 50.0},
                 "hitPlayer": true, "hitEpicId": "b", "hitPlayerBuild": false, "damage": 30.0},
                {"epicId": "a", "timestamp": secs(61) + 500_000, "weaponId": "ar",
                 "location": {"x": 2000.0, "y": 10.0, "z": 0.0},
                 "hitPlayer": false, "hitPlayerBuild": false}
            ]}),
        ),
        (
            ArtifactKind::Events,
            json!({
                "safeZoneUpdateEvents": zones,
                "knockedDownEvents": [{"epicId": "a", "targetId": "b", "timestamp": secs(61) + 800_000}],
                "eliminationEvents": [{
                    "epicId": "a", "targetId": "b", "timestamp": secs(62), "gunType": "ar",
                    "selfElimination": false
                }]
            }),
        ),
    ]
}

pub fn window_matches(match_ids: &[&str]) -> Value {
    let matches: Vec<Value> = match_ids
        .iter()
        .enumerate()
        .rev()
        .map(|(i, id)| {
            json!({"info": {
                "matchId": id,
                "startTimestamp": secs(2000 * i as i64),
                "endTimestamp": secs(2000 * i as i64 + 1500)
            }})
        })
        .collect();
    json!({ "matches": matches })
}
