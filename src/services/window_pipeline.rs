//! Event window orchestration
//!
//! A window is discovered, its metadata and match list fetched once, then
//! claimed with a compare-and-set on `processing` before every match runs
//! through `MatchPipeline` with skip-if-exists. The window ends `Failed` only
//! when more than half of its matches failed.

use crate::domain::error::{EtlError, EtlResult};
use crate::domain::types::{MatchId, WindowId};
use crate::domain::window::{utc_from_micros, EventWindow, WindowStatus};
use crate::infra::metrics::PipelineMetrics;
use crate::io::artifacts::{ArtifactKind, ArtifactStore};
use crate::io::fetcher::{ApiRequest, Fetcher};
use crate::io::store::MatchStore;
use crate::services::match_pipeline::MatchPipeline;
use crate::services::reconstructor::MatchInfo;
use crate::services::target_inference::TargetInference;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Match list of one window, ordered by start time
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMetadata {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub match_ids: Vec<MatchId>,
}

impl WindowMetadata {
    /// Parse the window match list (`{"matches": [{"info": {...}}, ...]}`).
    ///
    /// Entries without a match id are skipped; an empty list is `MalformedData`.
    pub fn from_json(window_id: &WindowId, payload: &Value) -> EtlResult<Self> {
        let items = payload
            .get("matches")
            .and_then(Value::as_array)
            .ok_or_else(|| EtlError::MissingData(format!("window {window_id} has no match list")))?;

        let mut matches: Vec<(MatchId, MatchInfo)> = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match MatchInfo::from_json(item) {
                Ok(info) => match info.match_id.clone() {
                    Some(id) => matches.push((MatchId(id), info)),
                    None => warn!(window_id = %window_id, index = %i, "window_match_without_id"),
                },
                Err(e) => warn!(window_id = %window_id, index = %i, error = %e, "window_match_skipped"),
            }
        }
        if matches.is_empty() {
            return Err(EtlError::MalformedData(format!("no matches found for window {window_id}")));
        }
        matches.sort_by_key(|(_, info)| info.start);

        let (_, first) = &matches[0];
        let (_, last) = &matches[matches.len() - 1];
        Ok(Self {
            start_time: utc_from_micros(first.start)?,
            end_time: last.end.map(utc_from_micros).transpose()?,
            match_ids: matches.into_iter().map(|(id, _)| id).collect(),
        })
    }

    pub fn total(&self) -> u32 {
        self.match_ids.len() as u32
    }
}

/// Operator-facing result of one window run
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSummary {
    pub window_id: WindowId,
    pub total: u32,
    /// Loaded in this run or already present
    pub succeeded: u32,
    /// Subset of `succeeded` that were already loaded
    pub skipped: u32,
    pub failed: u32,
    pub status: WindowStatus,
    pub failures: Vec<(MatchId, String)>,
}

impl WindowSummary {
    fn already_processed(window: &EventWindow) -> Self {
        Self {
            window_id: window.id.clone(),
            total: window.total_matches,
            succeeded: window.processed_matches,
            skipped: window.processed_matches,
            failed: 0,
            status: WindowStatus::Processed,
            failures: Vec::new(),
        }
    }

    pub fn log(&self) {
        info!(
            window_id = %self.window_id,
            status = %self.status,
            total = %self.total,
            succeeded = %self.succeeded,
            skipped = %self.skipped,
            failed = %self.failed,
            "window_summary"
        );
        for (match_id, reason) in &self.failures {
            warn!(window_id = %self.window_id, match_id = %match_id, reason = %reason, "window_match_failure");
        }
    }
}

/// Failed iff more than half the matches failed
#[inline]
pub fn final_status(failed: u32, total: u32) -> WindowStatus {
    if 2 * u64::from(failed) > u64::from(total) {
        WindowStatus::Failed
    } else {
        WindowStatus::Processed
    }
}

/// Outcome of one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub seen: usize,
    pub inserted: Vec<WindowId>,
}

pub struct WindowPipeline<'a> {
    fetcher: &'a dyn Fetcher,
    artifacts: &'a dyn ArtifactStore,
    inference: TargetInference,
    metrics: Arc<PipelineMetrics>,
    stale_lock: Duration,
}

impl<'a> WindowPipeline<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        artifacts: &'a dyn ArtifactStore,
        inference: TargetInference,
        metrics: Arc<PipelineMetrics>,
        stale_lock: Duration,
    ) -> Self {
        Self { fetcher, artifacts, inference, metrics, stale_lock }
    }

    /// Record every window seen in the recent tournament list that is not yet known.
    pub async fn discover(
        &self,
        store: &dyn MatchStore,
        interval_secs: u64,
    ) -> EtlResult<DiscoveryReport> {
        let payload = self.fetcher.fetch(&ApiRequest::Tournaments { interval_secs }).await?;
        let tournaments = payload
            .get("tournaments")
            .and_then(Value::as_array)
            .ok_or_else(|| EtlError::MalformedData("tournament list missing".into()))?;

        let mut seen = FxHashSet::default();
        let mut report = DiscoveryReport::default();
        let now = Utc::now();
        for t in tournaments {
            let Some(id) = t.get("eventWindowId").and_then(Value::as_str) else {
                continue;
            };
            if !seen.insert(id.to_string()) {
                continue;
            }
            let window = EventWindow::discovered(WindowId::new(id), now);
            if store.insert_window_if_absent(&window)? {
                info!(window_id = %window.id, "window_discovered");
                report.inserted.push(window.id);
            }
        }
        report.seen = seen.len();
        info!(seen = %report.seen, inserted = %report.inserted.len(), "discovery_complete");
        Ok(report)
    }

    /// Fetch window artifacts that are not on disk yet. Returns how many were fetched.
    pub async fn fetch_missing(&self, window_id: &WindowId) -> EtlResult<usize> {
        let owner = window_id.as_str();
        let missing = self.artifacts.missing(&ArtifactKind::REQUIRED_FOR_WINDOW, owner);
        for kind in &missing {
            let payload = self.fetcher.fetch(&ApiRequest::artifact(*kind, owner)).await?;
            self.artifacts.write(*kind, owner, &payload)?;
        }
        Ok(missing.len())
    }

    pub fn metadata(&self, window_id: &WindowId) -> EtlResult<WindowMetadata> {
        let payload = self.artifacts.read(ArtifactKind::WindowMatches, window_id.as_str())?;
        WindowMetadata::from_json(window_id, &payload)
    }

    /// Process one window end to end.
    ///
    /// Errors before the claim (metadata, busy window) are returned as-is and
    /// leave the window row untouched. Once claimed, a summary is always
    /// produced and the window always leaves `Processing`.
    pub async fn process(
        &self,
        store: &mut dyn MatchStore,
        window_id: &WindowId,
    ) -> EtlResult<WindowSummary> {
        let run_id = Uuid::now_v7();

        if let Some(existing) = store.window(window_id)? {
            if existing.status == WindowStatus::Processed {
                info!(run_id = %run_id, window_id = %window_id, "window_already_processed");
                return Ok(WindowSummary::already_processed(&existing));
            }
        }

        let fetched = self.fetch_missing(window_id).await?;
        let meta = self.metadata(window_id)?;
        let now = Utc::now();
        store.insert_window_if_absent(&EventWindow::discovered(window_id.clone(), now))?;

        let stale_lock = chrono::Duration::from_std(self.stale_lock).unwrap_or(chrono::Duration::zero());
        let stale_before = now - stale_lock;
        if !store.try_begin_window(window_id, now, stale_before)? {
            warn!(run_id = %run_id, window_id = %window_id, "window_claim_rejected");
            return Err(EtlError::WindowBusy(window_id.to_string()));
        }

        let end_time = meta.end_time.unwrap_or(meta.start_time);
        store.update_window_metadata(window_id, meta.start_time, end_time, meta.total())?;
        info!(
            run_id = %run_id,
            window_id = %window_id,
            matches = %meta.total(),
            fetched = %fetched,
            "window_processing_started"
        );

        let matches = MatchPipeline::new(
            self.fetcher,
            self.artifacts,
            self.inference.clone(),
            self.metrics.clone(),
        );
        let mut summary = WindowSummary {
            window_id: window_id.clone(),
            total: meta.total(),
            succeeded: 0,
            skipped: 0,
            failed: 0,
            status: WindowStatus::Processing,
            failures: Vec::new(),
        };

        for (i, match_id) in meta.match_ids.iter().enumerate() {
            let outcome = matches.run(store, match_id, window_id, true).await;
            if outcome.succeeded() {
                summary.succeeded += 1;
                summary.skipped += u32::from(outcome.skipped);
            } else {
                summary.failed += 1;
                summary
                    .failures
                    .push((match_id.clone(), outcome.reason.unwrap_or_else(|| "unknown".into())));
            }
            info!(
                run_id = %run_id,
                window_id = %window_id,
                progress = %format!("{}/{}", i + 1, meta.total()),
                match_id = %match_id,
                state = %outcome.state,
                "window_match_done"
            );
        }

        summary.status = final_status(summary.failed, summary.total);
        if let Err(e) = store.finish_window(window_id, summary.status, summary.succeeded, Utc::now()) {
            warn!(run_id = %run_id, window_id = %window_id, error = %e, "window_finish_failed");
            return Err(e);
        }
        summary.log();
        Ok(summary)
    }

    /// Process every NotStarted or Failed window in discovery order.
    ///
    /// A window that cannot be processed is logged and the rest still run.
    pub async fn process_pending(&self, store: &mut dyn MatchStore) -> EtlResult<Vec<WindowSummary>> {
        let pending = store.pending_windows()?;
        info!(pending = %pending.len(), "pending_windows_found");
        let mut summaries = Vec::with_capacity(pending.len());
        for window_id in pending {
            match self.process(store, &window_id).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    warn!(window_id = %window_id, kind = %e.kind(), error = %e, "window_not_processed")
                }
            }
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::artifacts::FsArtifactStore;
    use crate::io::store::SqliteStore;
    use crate::services::testing::{secs, window_matches, MockFetcher};
    use serde_json::json;

    fn pipeline<'a>(
        fetcher: &'a MockFetcher,
        artifacts: &'a FsArtifactStore,
        metrics: &Arc<PipelineMetrics>,
    ) -> WindowPipeline<'a> {
        WindowPipeline::new(
            fetcher,
            artifacts,
            TargetInference::default(),
            metrics.clone(),
            Duration::from_secs(6 * 3600),
        )
    }

    fn setup() -> (tempfile::TempDir, FsArtifactStore, SqliteStore, Arc<PipelineMetrics>) {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = FsArtifactStore::new(dir.path().join("raw"));
        (dir, artifacts, SqliteStore::open_in_memory().unwrap(), Arc::new(PipelineMetrics::new()))
    }

    #[test]
    fn test_final_status_threshold() {
        assert_eq!(final_status(4, 10), WindowStatus::Processed);
        assert_eq!(final_status(5, 10), WindowStatus::Processed);
        assert_eq!(final_status(6, 10), WindowStatus::Failed);
        assert_eq!(final_status(1, 1), WindowStatus::Failed);
        assert_eq!(final_status(1, 2), WindowStatus::Processed);
        assert_eq!(final_status(0, 0), WindowStatus::Processed);
    }

    #[test]
    fn test_metadata_sorted_by_start() {
        let w = WindowId::new("W1");
        let meta = WindowMetadata::from_json(&w, &window_matches(&["m1", "m2", "m3"])).unwrap();
        let ids: Vec<&str> = meta.match_ids.iter().map(MatchId::as_str).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(meta.start_time.timestamp_micros(), secs(0));
        assert_eq!(meta.end_time.unwrap().timestamp_micros(), secs(4000 + 1500));
        assert_eq!(meta.total(), 3);
    }

    #[test]
    fn test_metadata_empty_list_is_malformed() {
        let w = WindowId::new("W1");
        let err = WindowMetadata::from_json(&w, &json!({"matches": []})).unwrap_err();
        assert!(matches!(err, EtlError::MalformedData(_)));
        let err = WindowMetadata::from_json(&w, &json!({"info": []})).unwrap_err();
        assert!(matches!(err, EtlError::MissingData(_)));
    }

    #[tokio::test]
    async fn test_discover_dedupes_and_is_idempotent() {
        let (_dir, artifacts, store, metrics) = setup();
        let fetcher = MockFetcher::new();
        fetcher.insert(
            ApiRequest::Tournaments { interval_secs: 60 },
            json!({"tournaments": [
                {"eventWindowId": "W1"}, {"eventWindowId": "W2"}, {"eventWindowId": "W1"}, {"name": "no id"}
            ]}),
        );
        let p = pipeline(&fetcher, &artifacts, &metrics);

        let first = p.discover(&store, 60).await.unwrap();
        assert_eq!(first.seen, 2);
        assert_eq!(first.inserted, vec![WindowId::new("W1"), WindowId::new("W2")]);

        let second = p.discover(&store, 60).await.unwrap();
        assert!(second.inserted.is_empty());
        assert_eq!(store.pending_windows().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_process_window_all_matches() {
        let (_dir, artifacts, mut store, metrics) = setup();
        let fetcher = MockFetcher::new().with_match("m1").with_match("m2").with_window("W1", &["m1", "m2"]);
        let p = pipeline(&fetcher, &artifacts, &metrics);
        let w = WindowId::new("W1");

        let summary = p.process(&mut store, &w).await.unwrap();
        assert_eq!(summary.status, WindowStatus::Processed);
        assert_eq!((summary.total, summary.succeeded, summary.failed), (2, 2, 0));

        let row = store.window(&w).unwrap().unwrap();
        assert_eq!(row.status, WindowStatus::Processed);
        assert_eq!(row.total_matches, 2);
        assert_eq!(row.processed_matches, 2);
        assert!(row.last_processed.is_some());
        assert!(row.last_processing_start.is_some());

        // processed windows are a no-op
        let calls = fetcher.calls();
        let again = p.process(&mut store, &w).await.unwrap();
        assert_eq!(again.status, WindowStatus::Processed);
        assert_eq!(fetcher.calls(), calls);
    }

    #[tokio::test]
    async fn test_minority_failures_still_processed() {
        let (_dir, artifacts, mut store, metrics) = setup();
        let fetcher = MockFetcher::new()
            .with_match("m1")
            .with_match("m2")
            .with_window("W1", &["m1", "m2", "m3"]);
        let p = pipeline(&fetcher, &artifacts, &metrics);

        let summary = p.process(&mut store, &WindowId::new("W1")).await.unwrap();
        assert_eq!(summary.status, WindowStatus::Processed);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].0, MatchId::new("m3"));
        assert!(summary.failures[0].1.contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_majority_failures_mark_failed_then_retry_skips_loaded() {
        let (_dir, artifacts, mut store, metrics) = setup();
        let fetcher = MockFetcher::new().with_match("m1").with_window("W1", &["m1", "m2", "m3"]);
        let p = pipeline(&fetcher, &artifacts, &metrics);
        let w = WindowId::new("W1");

        let summary = p.process(&mut store, &w).await.unwrap();
        assert_eq!(summary.status, WindowStatus::Failed);
        assert_eq!((summary.succeeded, summary.failed), (1, 2));
        let row = store.window(&w).unwrap().unwrap();
        assert_eq!(row.status, WindowStatus::Failed);
        assert!(row.last_failed.is_some());
        assert_eq!(store.pending_windows().unwrap(), vec![w.clone()]);

        // the missing matches become available; m1 is skipped on the rerun
        for id in ["m2", "m3"] {
            for (kind, payload) in crate::services::testing::match_payloads(id) {
                fetcher.insert(ApiRequest::artifact(kind, id), payload);
            }
        }
        let summaries = p.process_pending(&mut store).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, WindowStatus::Processed);
        assert_eq!((summaries[0].succeeded, summaries[0].skipped), (3, 1));
        assert!(store.pending_windows().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_busy_window_rejected() {
        let (_dir, artifacts, mut store, metrics) = setup();
        let fetcher = MockFetcher::new().with_match("m1").with_window("W1", &["m1"]);
        let p = pipeline(&fetcher, &artifacts, &metrics);
        let w = WindowId::new("W1");

        let now = Utc::now();
        store.insert_window_if_absent(&EventWindow::discovered(w.clone(), now)).unwrap();
        assert!(store.try_begin_window(&w, now, now - chrono::Duration::hours(6)).unwrap());

        let err = p.process(&mut store, &w).await.unwrap_err();
        assert!(matches!(err, EtlError::WindowBusy(_)));
        assert_eq!(store.window(&w).unwrap().unwrap().status, WindowStatus::Processing);
    }

    #[tokio::test]
    async fn test_busy_window_row_left_unchanged() {
        let (_dir, artifacts, mut store, metrics) = setup();
        let fetcher = MockFetcher::new().with_match("m1").with_window("W1", &["m1"]);
        let p = pipeline(&fetcher, &artifacts, &metrics);
        let w = WindowId::new("W1");

        let now = Utc::now();
        store.insert_window_if_absent(&EventWindow::discovered(w.clone(), now)).unwrap();
        let start = utc_from_micros(secs(10)).unwrap();
        store.update_window_metadata(&w, start, utc_from_micros(secs(20)).unwrap(), 7).unwrap();
        assert!(store.try_begin_window(&w, now, now - chrono::Duration::hours(6)).unwrap());
        let before = store.window(&w).unwrap().unwrap();

        let err = p.process(&mut store, &w).await.unwrap_err();
        assert!(matches!(err, EtlError::WindowBusy(_)));
        let after = store.window(&w).unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.total_matches, 7);
        assert_eq!(after.start_time, Some(start));
    }

    /// Delegates to SQLite but refuses to close the window
    struct FinishFails(SqliteStore);

    impl MatchStore for FinishFails {
        fn match_exists(&self, id: &MatchId) -> EtlResult<bool> {
            self.0.match_exists(id)
        }

        fn load_match(
            &mut self,
            record: &crate::domain::window::MatchRecord,
            roster: &crate::io::roster::Roster,
            events: &[crate::domain::combat::CombatEvent],
        ) -> EtlResult<crate::io::store::LoadCounts> {
            self.0.load_match(record, roster, events)
        }

        fn insert_window_if_absent(&self, window: &EventWindow) -> EtlResult<bool> {
            self.0.insert_window_if_absent(window)
        }

        fn update_window_metadata(
            &self,
            id: &WindowId,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            total_matches: u32,
        ) -> EtlResult<()> {
            self.0.update_window_metadata(id, start, end, total_matches)
        }

        fn try_begin_window(
            &self,
            id: &WindowId,
            now: DateTime<Utc>,
            stale_before: DateTime<Utc>,
        ) -> EtlResult<bool> {
            self.0.try_begin_window(id, now, stale_before)
        }

        fn finish_window(
            &self,
            _id: &WindowId,
            _status: WindowStatus,
            _processed_matches: u32,
            _now: DateTime<Utc>,
        ) -> EtlResult<()> {
            Err(EtlError::Persistence(rusqlite::Error::InvalidQuery))
        }

        fn window(&self, id: &WindowId) -> EtlResult<Option<EventWindow>> {
            self.0.window(id)
        }

        fn pending_windows(&self) -> EtlResult<Vec<WindowId>> {
            self.0.pending_windows()
        }
    }

    #[tokio::test]
    async fn test_finish_failure_is_returned() {
        let (_dir, artifacts, store, metrics) = setup();
        let fetcher = MockFetcher::new().with_match("m1").with_window("W1", &["m1"]);
        let p = pipeline(&fetcher, &artifacts, &metrics);
        let w = WindowId::new("W1");
        let mut store = FinishFails(store);

        let err = p.process(&mut store, &w).await.unwrap_err();
        assert_eq!(err.kind(), "persistence");
        // Matches still loaded; the window stays claimed for a stale takeover
        assert!(store.match_exists(&MatchId::new("m1")).unwrap());
        assert_eq!(store.window(&w).unwrap().unwrap().status, WindowStatus::Processing);
    }

    #[tokio::test]
    async fn test_window_artifacts_fetched_once() {
        let (_dir, artifacts, _store, metrics) = setup();
        let fetcher = MockFetcher::new().with_window("W1", &["m1"]);
        let p = pipeline(&fetcher, &artifacts, &metrics);
        let w = WindowId::new("W1");

        assert_eq!(p.fetch_missing(&w).await.unwrap(), 2);
        assert_eq!(p.fetch_missing(&w).await.unwrap(), 0);
        assert_eq!(fetcher.calls(), 2);
    }
}
