//! Timestamp to storm-phase mapping
//!
//! A match has exactly `PHASE_COUNT` phases. Phase `k` is in effect until its
//! shrink finishes; after the final shrink the match stays in the last phase.

use crate::domain::error::{EtlError, EtlResult};
use crate::domain::types::{Timestamp, ZonePhase};

pub const PHASE_COUNT: usize = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneTimeline {
    /// Shrink-end timestamps ordered by phase number
    ends: [Timestamp; PHASE_COUNT],
}

impl ZoneTimeline {
    /// Build from the zone-phase log.
    ///
    /// Fails with `MalformedData` unless there are exactly 12 records whose
    /// end times are non-decreasing once ordered by phase number.
    pub fn build(phases: &[ZonePhase]) -> EtlResult<Self> {
        if phases.len() != PHASE_COUNT {
            return Err(EtlError::MalformedData(format!(
                "expected {PHASE_COUNT} zone phases, got {}",
                phases.len()
            )));
        }
        let mut sorted: Vec<&ZonePhase> = phases.iter().collect();
        sorted.sort_by_key(|p| p.phase);

        let mut ends = [0; PHASE_COUNT];
        for (slot, phase) in ends.iter_mut().zip(&sorted) {
            *slot = phase.shrink_end;
        }
        if let Some(w) = ends.windows(2).find(|w| w[0] > w[1]) {
            return Err(EtlError::MalformedData(format!(
                "zone end times decrease: {} > {}",
                w[0], w[1]
            )));
        }
        Ok(Self { ends })
    }

    /// Phase number in effect at `t`, in `1..=12`.
    pub fn zone_for(&self, t: Timestamp) -> u8 {
        let passed = self.ends.partition_point(|&end| end <= t);
        (passed + 1).min(PHASE_COUNT) as u8
    }
}
