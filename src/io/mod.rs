//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `fetcher` - HTTP client for the match-data API with retry/backoff
//! - `artifacts` - Raw JSON artifact cache on the local filesystem
//! - `roster` - Player roster parsing and observer filtering
//! - `store` - SQLite persistence for matches, players and combat events
//! - `egress` - Replay frames to chunked JSONL files

pub mod artifacts;
pub mod egress;
pub mod fetcher;
pub mod roster;
pub mod store;

// Re-export commonly used types
pub use artifacts::{ArtifactKind, ArtifactStore, FsArtifactStore};
pub use egress::{EgressStats, FrameEgress};
pub use fetcher::{ApiRequest, Fetcher, HttpFetcher, RetryPolicy};
pub use roster::{Roster, RosterEntry, TeamLookup};
pub use store::{LoadCounts, MatchStore, SqliteStore};
