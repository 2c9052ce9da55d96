//! Lock-free pipeline counters and run summary
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and never drive control flow.

use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector shared across pipeline stages via `Arc`
pub struct PipelineMetrics {
    started: Instant,
    events_parsed: AtomicU64,
    malformed_events: AtomicU64,
    shots_evaluated: AtomicU64,
    hit_attempts_inferred: AtomicU64,
    stray_shots: AtomicU64,
    degenerate_shots: AtomicU64,
    unresolved_positions: AtomicU64,
    frames_emitted: AtomicU64,
    fetches: AtomicU64,
    fetch_retries: AtomicU64,
    matches_loaded: AtomicU64,
    matches_skipped: AtomicU64,
    matches_failed: AtomicU64,
    /// Failure counts per reason label, only touched on the failure path
    failure_reasons: Mutex<FxHashMap<&'static str, u64>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            events_parsed: AtomicU64::new(0),
            malformed_events: AtomicU64::new(0),
            shots_evaluated: AtomicU64::new(0),
            hit_attempts_inferred: AtomicU64::new(0),
            stray_shots: AtomicU64::new(0),
            degenerate_shots: AtomicU64::new(0),
            unresolved_positions: AtomicU64::new(0),
            frames_emitted: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            fetch_retries: AtomicU64::new(0),
            matches_loaded: AtomicU64::new(0),
            matches_skipped: AtomicU64::new(0),
            matches_failed: AtomicU64::new(0),
            failure_reasons: Mutex::new(FxHashMap::default()),
        }
    }

    #[inline]
    pub fn record_events_parsed(&self, n: u64) {
        self.events_parsed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed_events(&self, n: u64) {
        self.malformed_events.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_shot_evaluated(&self) {
        self.shots_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_hit_attempt(&self) {
        self.hit_attempts_inferred.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stray_shot(&self) {
        self.stray_shots.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_degenerate_shot(&self) {
        self.degenerate_shots.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unresolved_position(&self) {
        self.unresolved_positions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frames(&self, n: u64) {
        self.frames_emitted.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fetch_retry(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_match_loaded(&self) {
        self.matches_loaded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_match_skipped(&self) {
        self.matches_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match_failed(&self, reason: &'static str) {
        self.matches_failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut reasons) = self.failure_reasons.lock() {
            *reasons.entry(reason).or_insert(0) += 1;
        }
    }

    pub fn matches_failed(&self) -> u64 {
        self.matches_failed.load(Ordering::Relaxed)
    }

    pub fn hit_attempts_inferred(&self) -> u64 {
        self.hit_attempts_inferred.load(Ordering::Relaxed)
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Snapshot of all counters (monotonic, not reset)
    pub fn report(&self) -> MetricsSummary {
        let mut failure_reasons: Vec<(String, u64)> = self
            .failure_reasons
            .lock()
            .map(|r| r.iter().map(|(k, v)| (k.to_string(), *v)).collect())
            .unwrap_or_default();
        failure_reasons.sort();

        MetricsSummary {
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            events_parsed: self.events_parsed.load(Ordering::Relaxed),
            malformed_events: self.malformed_events.load(Ordering::Relaxed),
            shots_evaluated: self.shots_evaluated.load(Ordering::Relaxed),
            hit_attempts_inferred: self.hit_attempts_inferred.load(Ordering::Relaxed),
            stray_shots: self.stray_shots.load(Ordering::Relaxed),
            degenerate_shots: self.degenerate_shots.load(Ordering::Relaxed),
            unresolved_positions: self.unresolved_positions.load(Ordering::Relaxed),
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            matches_loaded: self.matches_loaded.load(Ordering::Relaxed),
            matches_skipped: self.matches_skipped.load(Ordering::Relaxed),
            matches_failed: self.matches_failed.load(Ordering::Relaxed),
            failure_reasons,
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub elapsed_secs: f64,
    pub events_parsed: u64,
    pub malformed_events: u64,
    pub shots_evaluated: u64,
    pub hit_attempts_inferred: u64,
    pub stray_shots: u64,
    pub degenerate_shots: u64,
    pub unresolved_positions: u64,
    pub frames_emitted: u64,
    pub fetches: u64,
    pub fetch_retries: u64,
    pub matches_loaded: u64,
    pub matches_skipped: u64,
    pub matches_failed: u64,
    pub failure_reasons: Vec<(String, u64)>,
}

impl MetricsSummary {
    /// Share of evaluated indirect shots that produced a hit attempt
    pub fn inference_rate(&self) -> f64 {
        let indirect = self.hit_attempts_inferred + self.stray_shots;
        if indirect == 0 {
            return 0.0;
        }
        self.hit_attempts_inferred as f64 / indirect as f64
    }

    pub fn log(&self) {
        info!(
            elapsed_secs = format!("{:.1}", self.elapsed_secs),
            events_parsed = %self.events_parsed,
            malformed_events = %self.malformed_events,
            shots_evaluated = %self.shots_evaluated,
            hit_attempts = %self.hit_attempts_inferred,
            stray_shots = %self.stray_shots,
            degenerate_shots = %self.degenerate_shots,
            inference_rate = format!("{:.3}", self.inference_rate()),
            unresolved_positions = %self.unresolved_positions,
            frames = %self.frames_emitted,
            fetches = %self.fetches,
            fetch_retries = %self.fetch_retries,
            matches_loaded = %self.matches_loaded,
            matches_skipped = %self.matches_skipped,
            matches_failed = %self.matches_failed,
            failure_reasons = ?self.failure_reasons,
            "pipeline_metrics"
        );
    }
}
