//! Domain models - core combat and pipeline types
//!
//! This module contains the canonical data types used throughout the system:
//! - `RawEvent` - parsed log records, one variant per source log
//! - `Vec3`, `Ray`, `Sphere` - geometry for shot reconstruction
//! - `CombatEvent`, `PlayerState`, `Frame` - reconstructed output
//! - `EventWindow`, `MatchRecord` - persisted pipeline entities and their states
//! - `EtlError` - error kinds shared by every layer

pub mod combat;
pub mod error;
pub mod geometry;
pub mod types;
pub mod window;

// Re-export commonly used types at module level
pub use combat::{CombatEvent, CombatKind, Frame, PlayerState};
pub use error::{EtlError, EtlResult};
pub use geometry::{Ray, Sphere, Vec3};
pub use types::{LogKind, MatchId, PlayerId, RawEvent, Timestamp, WindowId};
pub use window::{EventWindow, MatchRecord, MatchState, WindowStatus};
