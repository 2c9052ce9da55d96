//! Combat log ETL library
//!
//! Fetches per-match telemetry, reconstructs combat events and replay
//! frames, and loads them into SQLite. Exposes modules for integration
//! testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
