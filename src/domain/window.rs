//! Event window and match records with their lifecycle states

use crate::domain::error::{EtlError, EtlResult};
use crate::domain::types::{MatchId, Timestamp, WindowId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Wall-clock time for a microsecond epoch timestamp
pub fn utc_from_micros(ts: Timestamp) -> EtlResult<DateTime<Utc>> {
    let secs = ts.div_euclid(1_000_000);
    let nanos = (ts.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| EtlError::MalformedData(format!("timestamp {ts} out of range")))
}

/// Persisted processing status of an event window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    NotStarted,
    Processing,
    Processed,
    Failed,
}

impl WindowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowStatus::NotStarted => "not_started",
            WindowStatus::Processing => "processing",
            WindowStatus::Processed => "processed",
            WindowStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> EtlResult<Self> {
        match s {
            "not_started" => Ok(WindowStatus::NotStarted),
            "processing" => Ok(WindowStatus::Processing),
            "processed" => Ok(WindowStatus::Processed),
            "failed" => Ok(WindowStatus::Failed),
            other => Err(EtlError::MalformedData(format!("unknown window status '{other}'"))),
        }
    }

    /// Processing -> Processing is a stale-claim reclaim.
    pub fn can_transition_to(&self, next: WindowStatus) -> bool {
        use WindowStatus::*;
        matches!(
            (self, next),
            (NotStarted, Processing)
                | (Failed, Processing)
                | (Processing, Processing)
                | (Processing, Processed)
                | (Processing, Failed)
        )
    }

    pub fn transition(self, next: WindowStatus) -> EtlResult<WindowStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(EtlError::IllegalTransition { from: self.as_str(), to: next.as_str() })
        }
    }
}

impl std::fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tournament stage grouping many matches
#[derive(Debug, Clone, PartialEq)]
pub struct EventWindow {
    pub id: WindowId,
    pub discovered_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_matches: u32,
    pub processed_matches: u32,
    pub status: WindowStatus,
    pub last_processing_start: Option<DateTime<Utc>>,
    pub last_processed: Option<DateTime<Utc>>,
    pub last_failed: Option<DateTime<Utc>>,
}

impl EventWindow {
    pub fn discovered(id: WindowId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            discovered_at: now,
            start_time: None,
            end_time: None,
            total_matches: 0,
            processed_matches: 0,
            status: WindowStatus::NotStarted,
            last_processing_start: None,
            last_processed: None,
            last_failed: None,
        }
    }
}

/// Persisted match row
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub id: MatchId,
    pub event_window_id: WindowId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub mode: Option<String>,
    pub duration_secs: Option<i64>,
    pub player_count: u32,
}

/// Lifecycle of one match through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    NotFetched,
    Fetched,
    Parsed,
    Loaded,
    Failed,
}

impl MatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchState::NotFetched => "not_fetched",
            MatchState::Fetched => "fetched",
            MatchState::Parsed => "parsed",
            MatchState::Loaded => "loaded",
            MatchState::Failed => "failed",
        }
    }

    /// NotFetched -> Loaded is the skip-if-exists short circuit.
    pub fn can_transition_to(&self, next: MatchState) -> bool {
        use MatchState::*;
        match (self, next) {
            (NotFetched, Fetched) | (Fetched, Parsed) | (Parsed, Loaded) => true,
            (NotFetched, Loaded) => true,
            (Loaded | Failed, _) => false,
            (_, Failed) => true,
            _ => false,
        }
    }

    pub fn transition(self, next: MatchState) -> EtlResult<MatchState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(EtlError::IllegalTransition { from: self.as_str(), to: next.as_str() })
        }
    }
}

impl std::fmt::Display for MatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
