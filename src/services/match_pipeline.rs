//! Per-match fetch, parse and load state machine
//!
//! `NotFetched -> Fetched -> Parsed -> Loaded`, with `Failed` reachable from
//! every non-terminal state. An existing match row short-circuits straight to
//! `Loaded` when skipping is requested.

use crate::domain::combat::CombatEvent;
use crate::domain::error::{EtlError, EtlResult};
use crate::domain::types::{MatchId, WindowId};
use crate::domain::window::{utc_from_micros, MatchRecord, MatchState};
use crate::infra::metrics::PipelineMetrics;
use crate::io::artifacts::{ArtifactKind, ArtifactStore};
use crate::io::egress::{EgressStats, FrameEgress};
use crate::io::fetcher::{ApiRequest, Fetcher};
use crate::io::roster::Roster;
use crate::io::store::{LoadCounts, MatchStore};
use crate::services::reconstructor::{
    merge_timeline, replay, MatchInfo, MatchLogs, Reconstructor, WeaponCatalog,
};
use crate::services::target_inference::TargetInference;
use crate::services::zone_timeline::ZoneTimeline;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything derived from one match's artifacts
#[derive(Debug, Clone)]
pub struct ParsedMatch {
    pub match_id: MatchId,
    pub info: MatchInfo,
    pub roster: Roster,
    pub logs: MatchLogs,
    pub zones: ZoneTimeline,
    pub events: Vec<CombatEvent>,
}

impl ParsedMatch {
    pub fn record(&self, window_id: &WindowId) -> EtlResult<MatchRecord> {
        Ok(MatchRecord {
            id: self.match_id.clone(),
            event_window_id: window_id.clone(),
            start_time: utc_from_micros(self.info.start)?,
            end_time: self.info.end.map(utc_from_micros).transpose()?,
            mode: self.info.mode.clone(),
            duration_secs: self.info.duration_secs(),
            player_count: self.roster.human_count() as u32,
        })
    }
}

/// Result of one match run; failures keep their reason
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub match_id: MatchId,
    pub state: MatchState,
    /// Loaded by the skip-if-exists short circuit
    pub skipped: bool,
    pub counts: LoadCounts,
    pub reason: Option<String>,
}

impl MatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == MatchState::Loaded
    }
}

pub struct MatchPipeline<'a> {
    fetcher: &'a dyn Fetcher,
    artifacts: &'a dyn ArtifactStore,
    reconstructor: Reconstructor,
    metrics: Arc<PipelineMetrics>,
}

impl<'a> MatchPipeline<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        artifacts: &'a dyn ArtifactStore,
        inference: TargetInference,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let reconstructor = Reconstructor::new(inference, metrics.clone());
        Self { fetcher, artifacts, reconstructor, metrics }
    }

    /// Run one match to a terminal state. Never returns an error; a failure is
    /// recorded in the outcome.
    pub async fn run(
        &self,
        store: &mut dyn MatchStore,
        match_id: &MatchId,
        window_id: &WindowId,
        skip_if_exists: bool,
    ) -> MatchOutcome {
        let mut state = MatchState::NotFetched;
        let result = self.advance(&mut state, store, match_id, window_id, skip_if_exists).await;

        match result {
            Ok((skipped, counts)) => {
                MatchOutcome { match_id: match_id.clone(), state, skipped, counts, reason: None }
            }
            Err(err) => {
                let from = state;
                state = state.transition(MatchState::Failed).unwrap_or(MatchState::Failed);
                self.metrics.record_match_failed(err.kind());
                warn!(
                    match_id = %match_id,
                    from_state = %from,
                    kind = %err.kind(),
                    error = %err,
                    "match_failed"
                );
                MatchOutcome {
                    match_id: match_id.clone(),
                    state,
                    skipped: false,
                    counts: LoadCounts::default(),
                    reason: Some(err.to_string()),
                }
            }
        }
    }

    async fn advance(
        &self,
        state: &mut MatchState,
        store: &mut dyn MatchStore,
        match_id: &MatchId,
        window_id: &WindowId,
        skip_if_exists: bool,
    ) -> EtlResult<(bool, LoadCounts)> {
        if skip_if_exists && store.match_exists(match_id)? {
            *state = state.transition(MatchState::Loaded)?;
            self.metrics.record_match_skipped();
            info!(match_id = %match_id, "match_skipped_existing");
            return Ok((true, LoadCounts::default()));
        }

        self.fetch_missing(match_id).await?;
        *state = state.transition(MatchState::Fetched)?;

        let parsed = self.parse(match_id)?;
        *state = state.transition(MatchState::Parsed)?;

        let counts = self.load(store, &parsed, window_id)?;
        *state = state.transition(MatchState::Loaded)?;
        Ok((false, counts))
    }

    /// Fetch and store every required artifact not already on disk.
    ///
    /// Returns how many were fetched; zero when all were present.
    pub async fn fetch_missing(&self, match_id: &MatchId) -> EtlResult<usize> {
        let owner = match_id.as_str();
        let missing = self.artifacts.missing(&ArtifactKind::REQUIRED_FOR_MATCH, owner);
        for kind in &missing {
            let payload = self.fetcher.fetch(&ApiRequest::artifact(*kind, owner)).await?;
            self.artifacts.write(*kind, owner, &payload)?;
            debug!(match_id = %match_id, kind = %kind, "artifact_fetched");
        }
        if !missing.is_empty() {
            info!(match_id = %match_id, fetched = %missing.len(), "match_artifacts_fetched");
        }
        Ok(missing.len())
    }

    /// Decode all artifacts and build combat events.
    pub fn parse(&self, match_id: &MatchId) -> EtlResult<ParsedMatch> {
        let owner = match_id.as_str();
        let missing = self.artifacts.missing(&ArtifactKind::REQUIRED_FOR_MATCH, owner);
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(ArtifactKind::as_str).collect();
            return Err(EtlError::MissingData(format!(
                "match {match_id} lacks {}",
                names.join(", ")
            )));
        }

        let read = |kind| self.artifacts.read(kind, owner);
        let info = MatchInfo::from_json(&read(ArtifactKind::MatchInfo)?)?;
        let roster = Roster::from_json(&read(ArtifactKind::Players)?)?;
        let logs = MatchLogs::from_artifacts(
            &read(ArtifactKind::Movement)?,
            &read(ArtifactKind::Shots)?,
            &read(ArtifactKind::Events)?,
        )?;
        let zones = ZoneTimeline::build(&logs.zones)?;
        let weapons = if self.artifacts.exists(ArtifactKind::Weapons, owner) {
            Some(WeaponCatalog::from_json(&read(ArtifactKind::Weapons)?)?)
        } else {
            None
        };

        self.metrics.record_events_parsed(logs.total() as u64);
        self.metrics.record_malformed_events(logs.skipped as u64);

        let events =
            self.reconstructor.build_combat_events(&logs, &roster, &zones, weapons.as_ref())?;
        info!(
            match_id = %match_id,
            players = %roster.human_count(),
            raw_events = %logs.total(),
            skipped = %logs.skipped,
            combat_events = %events.len(),
            weapons = %weapons.as_ref().map_or(0, WeaponCatalog::len),
            "match_parsed"
        );

        Ok(ParsedMatch { match_id: match_id.clone(), info, roster, logs, zones, events })
    }

    /// Write the match and its events in one transaction
    pub fn load(
        &self,
        store: &mut dyn MatchStore,
        parsed: &ParsedMatch,
        window_id: &WindowId,
    ) -> EtlResult<LoadCounts> {
        let record = parsed.record(window_id)?;
        let counts = store.load_match(&record, &parsed.roster, &parsed.events)?;
        self.metrics.record_match_loaded();
        info!(
            match_id = %parsed.match_id,
            window_id = %window_id,
            players = %counts.players,
            damage_events = %counts.damage_events,
            elimination_events = %counts.elimination_events,
            "match_loaded"
        );
        Ok(counts)
    }

    /// Replay the merged stream and write frame chunks
    pub fn export_frames(
        &self,
        parsed: &ParsedMatch,
        egress: &FrameEgress,
        sample_hz: u32,
    ) -> EtlResult<EgressStats> {
        let merged = merge_timeline(&parsed.logs);
        let plan = replay(&merged, &parsed.roster, parsed.info.replay_origin(), sample_hz);
        egress.write_players(&parsed.match_id, plan.players(), &parsed.roster, plan.sample_hz())?;
        let stats = egress.write_frames(plan.frames())?;
        self.metrics.record_frames(stats.frames);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::artifacts::FsArtifactStore;
    use crate::io::store::{EventTable, SqliteStore};
    use crate::services::testing::{match_payloads, secs, MockFetcher};

    struct Fixture {
        dir: tempfile::TempDir,
        artifacts: FsArtifactStore,
        store: SqliteStore,
        metrics: Arc<PipelineMetrics>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                artifacts: FsArtifactStore::new(dir.path().join("raw")),
                dir,
                store: SqliteStore::open_in_memory().unwrap(),
                metrics: Arc::new(PipelineMetrics::new()),
            }
        }

        fn stage_all(&self) {
            for (kind, payload) in match_payloads("m1") {
                self.artifacts.write(kind, "m1", &payload).unwrap();
            }
        }
    }

    fn pipeline<'a>(
        artifacts: &'a FsArtifactStore,
        metrics: &Arc<PipelineMetrics>,
        fetcher: &'a MockFetcher,
    ) -> MatchPipeline<'a> {
        MatchPipeline::new(fetcher, artifacts, TargetInference::default(), metrics.clone())
    }

    fn ids() -> (MatchId, WindowId) {
        (MatchId::new("m1"), WindowId::new("W1"))
    }

    #[tokio::test]
    async fn test_full_run_loads_match() {
        let mut f = Fixture::new();
        let fetcher = MockFetcher::new().with_match("m1");
        let (m, w) = ids();

        let p = pipeline(&f.artifacts, &f.metrics, &fetcher);
        let outcome = p.run(&mut f.store, &m, &w, true).await;
        assert_eq!(outcome.state, MatchState::Loaded);
        assert!(outcome.succeeded());
        assert!(!outcome.skipped);
        assert_eq!(outcome.reason, None);
        assert_eq!(
            outcome.counts,
            LoadCounts { players: 2, damage_events: 2, elimination_events: 1 }
        );
        assert_eq!(fetcher.calls(), 5);
        assert_eq!(f.store.count_for_match(EventTable::Damage, &m).unwrap(), 2);
        assert_eq!(f.metrics.hit_attempts_inferred(), 1);
    }

    #[tokio::test]
    async fn test_existing_match_short_circuits() {
        let mut f = Fixture::new();
        let fetcher = MockFetcher::new().with_match("m1");
        let (m, w) = ids();
        let p = pipeline(&f.artifacts, &f.metrics, &fetcher);
        p.run(&mut f.store, &m, &w, true).await;
        let calls = fetcher.calls();

        let outcome = p.run(&mut f.store, &m, &w, true).await;
        assert_eq!(outcome.state, MatchState::Loaded);
        assert!(outcome.skipped);
        assert_eq!(fetcher.calls(), calls);
        assert_eq!(f.store.count_for_match(EventTable::Damage, &m).unwrap(), 2);
        assert_eq!(f.metrics.report().matches_skipped, 1);
    }

    #[tokio::test]
    async fn test_fetch_missing_is_idempotent() {
        let f = Fixture::new();
        let fetcher = MockFetcher::new().with_match("m1");
        let p = pipeline(&f.artifacts, &f.metrics, &fetcher);
        let m = MatchId::new("m1");

        assert_eq!(p.fetch_missing(&m).await.unwrap(), 5);
        assert_eq!(p.fetch_missing(&m).await.unwrap(), 0);
        assert_eq!(fetcher.calls(), 5);
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_match_with_reason() {
        let mut f = Fixture::new();
        let fetcher = MockFetcher::new().with_match("m1");
        fetcher.remove(&ApiRequest::artifact(ArtifactKind::Shots, "m1"));
        let (m, w) = ids();

        let p = pipeline(&f.artifacts, &f.metrics, &fetcher);
        let outcome = p.run(&mut f.store, &m, &w, true).await;
        assert_eq!(outcome.state, MatchState::Failed);
        assert!(outcome.reason.unwrap().contains("HTTP 404"));
        assert!(!f.store.match_exists(&m).unwrap());
        assert_eq!(f.metrics.report().failure_reasons, vec![("fetch_rejected".to_string(), 1)]);
    }

    #[test]
    fn test_parse_requires_all_artifacts() {
        let f = Fixture::new();
        let fetcher = MockFetcher::new();
        for (kind, payload) in match_payloads("m1") {
            if kind != ArtifactKind::Events {
                f.artifacts.write(kind, "m1", &payload).unwrap();
            }
        }
        let err = pipeline(&f.artifacts, &f.metrics, &fetcher).parse(&MatchId::new("m1")).unwrap_err();
        assert!(matches!(err, EtlError::MissingData(ref s) if s.contains("events")));
    }

    #[tokio::test]
    async fn test_malformed_zone_log_fails_only_this_match() {
        let mut f = Fixture::new();
        let fetcher = MockFetcher::new().with_match("m1");
        fetcher.insert(
            ApiRequest::artifact(ArtifactKind::Events, "m1"),
            serde_json::json!({"safeZoneUpdateEvents": [{"currentPhase": 1, "shrinkEndTime": 5}]}),
        );
        let (m, w) = ids();

        let p = pipeline(&f.artifacts, &f.metrics, &fetcher);
        let outcome = p.run(&mut f.store, &m, &w, false).await;
        assert_eq!(outcome.state, MatchState::Failed);
        assert!(outcome.reason.unwrap().contains("malformed"));
    }

    #[tokio::test]
    async fn test_load_without_skip_on_existing_match_fails() {
        let mut f = Fixture::new();
        let fetcher = MockFetcher::new().with_match("m1");
        let (m, w) = ids();
        let p = pipeline(&f.artifacts, &f.metrics, &fetcher);
        p.run(&mut f.store, &m, &w, false).await;

        let outcome = p.run(&mut f.store, &m, &w, false).await;
        assert_eq!(outcome.state, MatchState::Failed);
        // first load untouched by the rolled back second one
        assert_eq!(f.store.count_for_match(EventTable::Elimination, &m).unwrap(), 1);
    }

    #[test]
    fn test_parse_record_and_weapon_types() {
        let f = Fixture::new();
        let fetcher = MockFetcher::new();
        f.stage_all();
        f.artifacts
            .write(
                ArtifactKind::Weapons,
                "m1",
                &serde_json::json!({"weapons": [{"weaponId": "ar", "weaponType": "ASSAULT"}]}),
            )
            .unwrap();

        let parsed = pipeline(&f.artifacts, &f.metrics, &fetcher).parse(&MatchId::new("m1")).unwrap();
        assert_eq!(parsed.events.len(), 3);
        assert!(parsed.events.iter().all(|e| e.weapon_type.as_deref() == Some("ASSAULT")));
        assert!(parsed.events.iter().all(|e| e.zone == 1));

        let record = parsed.record(&WindowId::new("W1")).unwrap();
        assert_eq!(record.player_count, 2);
        assert_eq!(record.duration_secs, Some(1500));
        assert_eq!(record.mode.as_deref(), Some("solo"));
        assert_eq!(record.start_time.timestamp_micros(), secs(0));
    }

    #[test]
    fn test_export_frames_from_aircraft_start() {
        let f = Fixture::new();
        let fetcher = MockFetcher::new();
        f.stage_all();
        let p = pipeline(&f.artifacts, &f.metrics, &fetcher);
        let parsed = p.parse(&MatchId::new("m1")).unwrap();
        assert_eq!(parsed.logs.zones.len(), 12);
        let egress = FrameEgress::new(&f.dir.path().join("processed"), &parsed.match_id, 10);

        let stats = p.export_frames(&parsed, &egress, 20).unwrap();
        // origin at 60s, last tracked event at 62s: ticks 60.00 ..= 62.00 at 20 Hz
        assert_eq!(stats.frames, 41);
        assert_eq!(stats.chunks, 5);
        assert!(egress.players_path().exists());
        assert_eq!(f.metrics.report().frames_emitted, 41);

        // zone shrinks run to 1440s but the stream stops at the elimination
        let last_chunk = std::fs::read_to_string(egress.chunk_path(4)).unwrap();
        let last: serde_json::Value = serde_json::from_str(last_chunk.lines().last().unwrap()).unwrap();
        assert_eq!(last["timestamp"], secs(62));
    }
}
