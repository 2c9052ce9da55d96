//! Services - business logic and pipeline orchestration
//!
//! This module contains the core ETL services:
//! - `temporal_index` - Per-player nearest-timestamp lookup
//! - `zone_timeline` - Storm phase boundaries and zone lookup
//! - `target_inference` - Ray/sphere target inference for indirect shots
//! - `reconstructor` - Combat event building and replay state reconstruction
//! - `match_pipeline` - Single match fetch/parse/load state machine
//! - `window_pipeline` - Event window discovery and batch processing

pub mod match_pipeline;
pub mod reconstructor;
pub mod target_inference;
pub mod temporal_index;
pub mod window_pipeline;
pub mod zone_timeline;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use match_pipeline::{MatchOutcome, MatchPipeline, ParsedMatch};
pub use reconstructor::Reconstructor;
pub use target_inference::{HitboxModel, TargetInference};
pub use temporal_index::TemporalIndex;
pub use window_pipeline::{DiscoveryReport, WindowMetadata, WindowPipeline, WindowSummary};
pub use zone_timeline::ZoneTimeline;
