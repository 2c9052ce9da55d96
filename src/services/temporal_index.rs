//! Per-entity nearest-timestamp lookup
//!
//! A `PlayerTimeline` holds one entity's records of a single log type in
//! ascending (stable) timestamp order. Lookups return the index of the record
//! whose timestamp is closest to the reference; on equal distance the earliest
//! index wins, including within runs of duplicate timestamps.

use crate::domain::error::{EtlError, EtlResult};
use crate::domain::types::{PlayerId, Timestamp};
use rustc_hash::FxHashMap;

/// Ascending timeline for one entity, immutable after construction
#[derive(Debug, Clone)]
pub struct PlayerTimeline<T> {
    timestamps: Vec<Timestamp>,
    events: Vec<T>,
}

impl<T> PlayerTimeline<T> {
    pub fn new(mut events: Vec<T>, ts_fn: impl Fn(&T) -> Timestamp) -> Self {
        events.sort_by_key(|e| ts_fn(e));
        let timestamps = events.iter().map(&ts_fn).collect();
        Self { timestamps, events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[T] {
        &self.events
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.events.get(idx)
    }

    /// First index of the run of records sharing `timestamps[idx]`
    #[inline]
    fn run_start(&self, idx: usize) -> usize {
        let ts = self.timestamps[idx];
        self.timestamps.partition_point(|&x| x < ts)
    }

    /// Pick between the record just before `t` and the first record at or after `t`.
    ///
    /// `after` is the first index with `timestamps[after] >= t`, `before_run` the
    /// first index of the run ending at `after - 1`.
    #[inline]
    fn choose(&self, t: Timestamp, after: usize, before_run: usize) -> usize {
        let n = self.timestamps.len();
        if after == 0 {
            return 0;
        }
        if after == n {
            return before_run;
        }
        let d_before = t.abs_diff(self.timestamps[after - 1]);
        let d_after = self.timestamps[after].abs_diff(t);
        if d_before <= d_after {
            before_run
        } else {
            after
        }
    }

    /// Index of the record closest in time to `t`. O(log n).
    pub fn nearest(&self, t: Timestamp) -> EtlResult<usize> {
        if self.timestamps.is_empty() {
            return Err(EtlError::NotFound("empty timeline".into()));
        }
        let after = self.timestamps.partition_point(|&x| x < t);
        let before_run = if after > 0 { self.run_start(after - 1) } else { 0 };
        Ok(self.choose(t, after, before_run))
    }

    pub fn nearest_event(&self, t: Timestamp) -> EtlResult<&T> {
        let idx = self.nearest(t)?;
        Ok(&self.events[idx])
    }

    /// Resolve many references at once.
    ///
    /// Ascending references are answered with a single merge sweep, O(m + n).
    /// Anything else falls back to one binary search per reference.
    pub fn nearest_batch(&self, refs: &[Timestamp]) -> EtlResult<Vec<usize>> {
        if self.timestamps.is_empty() {
            return Err(EtlError::NotFound("empty timeline".into()));
        }
        if !refs.windows(2).all(|w| w[0] <= w[1]) {
            return refs.iter().map(|&t| self.nearest(t)).collect();
        }

        let n = self.timestamps.len();
        let mut out = Vec::with_capacity(refs.len());
        let mut after = 0usize;
        // run start of timestamps[after - 1]
        let mut before_run = 0usize;
        for &t in refs {
            while after < n && self.timestamps[after] < t {
                if after == 0 || self.timestamps[after] != self.timestamps[after - 1] {
                    before_run = after;
                }
                after += 1;
            }
            out.push(self.choose(t, after, before_run));
        }
        Ok(out)
    }
}

/// One timeline per entity for a single log type
#[derive(Debug, Clone)]
pub struct TemporalIndex<T> {
    timelines: FxHashMap<PlayerId, PlayerTimeline<T>>,
}

impl<T> TemporalIndex<T> {
    pub fn build(
        events: impl IntoIterator<Item = T>,
        entity_fn: impl Fn(&T) -> PlayerId,
        ts_fn: impl Fn(&T) -> Timestamp,
    ) -> Self {
        let mut grouped: FxHashMap<PlayerId, Vec<T>> = FxHashMap::default();
        for event in events {
            grouped.entry(entity_fn(&event)).or_default().push(event);
        }
        let timelines = grouped
            .into_iter()
            .map(|(id, evs)| (id, PlayerTimeline::new(evs, &ts_fn)))
            .collect();
        Self { timelines }
    }

    pub fn timeline(&self, entity: &PlayerId) -> EtlResult<&PlayerTimeline<T>> {
        self.timelines
            .get(entity)
            .ok_or_else(|| EtlError::NotFound(format!("no timeline for entity {entity}")))
    }

    pub fn nearest(&self, entity: &PlayerId, t: Timestamp) -> EtlResult<&T> {
        self.timeline(entity)?
            .nearest_event(t)
            .map_err(|_| EtlError::NotFound(format!("no records for entity {entity}")))
    }

    pub fn nearest_batch(&self, entity: &PlayerId, refs: &[Timestamp]) -> EtlResult<Vec<&T>> {
        let timeline = self.timeline(entity)?;
        let idx = timeline.nearest_batch(refs)?;
        Ok(idx.into_iter().filter_map(|i| timeline.get(i)).collect())
    }

    /// Entity ids in sorted order
    pub fn entities(&self) -> Vec<&PlayerId> {
        let mut ids: Vec<_> = self.timelines.keys().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.timelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.is_empty()
    }
}
