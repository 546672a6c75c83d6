//! Reference counting for segments shared between versions and reader snapshots.
//!
//! Reader snapshots acquire the segments of the version they read. A segment that a
//! merge has replaced is retired once a version without it is committed; its files are
//! removed by the next garbage collection after its last snapshot is gone.

use std::sync::{Arc, Mutex};

use ahash::{AHashMap, AHashSet};
use strata_common::ids::SegmentId;
use strata_format::Version;

#[derive(Debug, Default)]
struct TrackerState {
    refs: AHashMap<SegmentId, usize>,
    pending: AHashSet<SegmentId>,
    ready: Vec<SegmentId>,
}

#[derive(Debug, Default)]
pub struct SegmentTracker {
    state: Mutex<TrackerState>,
}

impl SegmentTracker {
    pub fn new() -> SegmentTracker {
        Default::default()
    }

    /// Acquires a reference to each segment; segments already retired are skipped.
    /// Returns the ids actually acquired.
    pub fn acquire(&self, segment_ids: &[SegmentId]) -> Vec<SegmentId> {
        let mut state = self.state.lock().expect("tracker lock");
        let mut acquired = Vec::with_capacity(segment_ids.len());
        for &id in segment_ids {
            if state.pending.contains(&id) {
                continue;
            }
            *state.refs.entry(id).or_insert(0) += 1;
            acquired.push(id);
        }
        acquired
    }

    pub fn release(&self, segment_ids: &[SegmentId]) {
        let mut state = self.state.lock().expect("tracker lock");
        for id in segment_ids {
            let Some(count) = state.refs.get_mut(id) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.refs.remove(id);
                if state.pending.remove(id) {
                    state.ready.push(*id);
                }
            }
        }
    }

    /// Retires segments that are no longer part of the committed version. Unreferenced
    /// segments become ready for deletion at once, the rest when released.
    pub fn retire(&self, segment_ids: &[SegmentId]) {
        let mut state = self.state.lock().expect("tracker lock");
        for &id in segment_ids {
            if state.refs.get(&id).copied().unwrap_or(0) == 0 {
                state.ready.push(id);
            } else {
                state.pending.insert(id);
            }
        }
    }

    /// Takes the segments whose files can now be removed.
    pub fn take_ready(&self) -> Vec<SegmentId> {
        let mut ready = std::mem::take(&mut self.state.lock().expect("tracker lock").ready);
        ready.sort_unstable();
        ready.dedup();
        ready
    }

    pub fn ref_count(&self, segment_id: SegmentId) -> usize {
        let state = self.state.lock().expect("tracker lock");
        state.refs.get(&segment_id).copied().unwrap_or(0)
    }

    pub fn is_pending_deletion(&self, segment_id: SegmentId) -> bool {
        let state = self.state.lock().expect("tracker lock");
        state.pending.contains(&segment_id)
    }
}

/// A committed version pinned for reading. Dropping the snapshot releases its segments.
pub struct VersionSnapshot {
    version: Arc<Version>,
    tracker: Arc<SegmentTracker>,
    acquired: Vec<SegmentId>,
}

impl VersionSnapshot {
    pub(crate) fn new(version: Arc<Version>, tracker: Arc<SegmentTracker>) -> VersionSnapshot {
        let acquired = tracker.acquire(&version.segments);
        VersionSnapshot {
            version,
            tracker,
            acquired,
        }
    }

    pub fn version(&self) -> &Arc<Version> {
        &self.version
    }

    pub fn segment_ids(&self) -> &[SegmentId] {
        &self.acquired
    }
}

impl Drop for VersionSnapshot {
    fn drop(&mut self) {
        self.tracker.release(&self.acquired);
    }
}

impl std::fmt::Debug for VersionSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSnapshot")
            .field("version_id", &self.version.version_id)
            .field("segments", &self.acquired)
            .finish()
    }
}
