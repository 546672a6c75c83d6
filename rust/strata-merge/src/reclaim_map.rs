//! Old to new doc id mapping of one merge.
//!
//! Sources are visited in the order given (ascending segment id), each over its local
//! doc ids. Deleted documents are dropped. Every other document is routed to a target
//! segment by a [`SegmentSplitStrategy`] and gets the next free local doc id of that
//! target, so the new ids of each target form the dense range `[0, target_doc_count)`.

use std::sync::Arc;

use strata_common::{
    Result,
    error::Error,
    ids::{DocId, SegmentId},
};
use strata_segment::SegmentData;

use crate::split_strategy::SegmentSplitStrategy;

const DROPPED: u64 = u64::MAX;

fn pack(target: usize, local: DocId) -> u64 {
    ((target as u64) << 32) | local as u64
}

fn unpack(entry: u64) -> Option<(usize, DocId)> {
    (entry != DROPPED).then(|| ((entry >> 32) as usize, entry as u32))
}

#[derive(Debug, Clone)]
pub struct ReclaimMap {
    source_segments: Vec<SegmentId>,
    /// Start of each source's entries in `entries`; one extra trailing element.
    source_starts: Vec<usize>,
    entries: Vec<u64>,
    target_doc_counts: Vec<u32>,
    /// First new global doc id of each target, in target order.
    target_bases: Vec<DocId>,
}

impl ReclaimMap {
    /// Builds the map for merging `sources`, which must be in ascending segment id order.
    pub fn build(
        sources: &[Arc<SegmentData>],
        strategy: &dyn SegmentSplitStrategy,
    ) -> Result<ReclaimMap> {
        let ids = sources.iter().map(|s| s.segment_id()).collect::<Vec<_>>();
        let doc_counts = sources.iter().map(|s| s.doc_count()).collect::<Vec<_>>();
        Self::build_with(&ids, &doc_counts, |i, doc| sources[i].is_deleted(doc), strategy)
    }

    /// Builds the map from source doc counts and a deletion predicate over
    /// `(source_index, local_doc_id)`.
    pub fn build_with(
        segment_ids: &[SegmentId],
        doc_counts: &[u32],
        is_deleted: impl Fn(usize, DocId) -> bool,
        strategy: &dyn SegmentSplitStrategy,
    ) -> Result<ReclaimMap> {
        if segment_ids.len() != doc_counts.len() {
            return Err(Error::invalid_arg(
                "doc_counts",
                "one doc count per source segment is required",
            ));
        }
        if segment_ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::invalid_arg(
                "segment_ids",
                "merge sources must be in ascending segment id order",
            ));
        }
        let target_count = strategy.target_segment_count();
        if target_count == 0 {
            return Err(Error::invalid_arg(
                "strategy",
                format!("split strategy '{}' has no target segments", strategy.name()),
            ));
        }

        let total = doc_counts.iter().map(|&c| c as usize).sum::<usize>();
        let mut entries = Vec::with_capacity(total);
        let mut source_starts = Vec::with_capacity(doc_counts.len() + 1);
        let mut target_doc_counts = vec![0u32; target_count];
        for (source, &doc_count) in doc_counts.iter().enumerate() {
            source_starts.push(entries.len());
            for doc in 0..doc_count {
                if is_deleted(source, doc) {
                    entries.push(DROPPED);
                    continue;
                }
                let target = strategy.process(source, doc)?;
                if target >= target_count {
                    return Err(Error::invalid_arg(
                        "strategy",
                        format!(
                            "split strategy '{}' routed a document to target {target} of {target_count}",
                            strategy.name()
                        ),
                    ));
                }
                entries.push(pack(target, target_doc_counts[target]));
                target_doc_counts[target] += 1;
            }
        }
        source_starts.push(entries.len());

        let mut target_bases = Vec::with_capacity(target_count);
        let mut base = 0;
        for &count in &target_doc_counts {
            target_bases.push(base);
            base += count;
        }
        let map = ReclaimMap {
            source_segments: segment_ids.to_vec(),
            source_starts,
            entries,
            target_doc_counts,
            target_bases,
        };
        log::debug!(
            "reclaim map over segments {:?}: {} docs kept, {} dropped, targets {:?}",
            map.source_segments,
            map.new_doc_count(),
            map.deleted_doc_count(),
            map.target_doc_counts
        );
        Ok(map)
    }

    fn entry(&self, source_index: usize, local_doc_id: DocId) -> Option<(usize, DocId)> {
        let start = *self.source_starts.get(source_index)?;
        let end = *self.source_starts.get(source_index + 1)?;
        let pos = start + local_doc_id as usize;
        if pos >= end {
            return None;
        }
        unpack(self.entries[pos])
    }

    /// New doc id across all targets laid out in target order, or `None` if dropped.
    pub fn get_new_id(&self, source_index: usize, local_doc_id: DocId) -> Option<DocId> {
        self.entry(source_index, local_doc_id)
            .map(|(target, local)| self.target_bases[target] + local)
    }

    /// New local doc id within its target segment, or `None` if dropped.
    pub fn get_local_id(&self, source_index: usize, local_doc_id: DocId) -> Option<DocId> {
        self.entry(source_index, local_doc_id).map(|(_, local)| local)
    }

    pub fn get_target_segment_index(
        &self,
        source_index: usize,
        local_doc_id: DocId,
    ) -> Option<usize> {
        self.entry(source_index, local_doc_id)
            .map(|(target, _)| target)
    }

    pub fn source_count(&self) -> usize {
        self.source_segments.len()
    }

    pub fn source_segments(&self) -> &[SegmentId] {
        &self.source_segments
    }

    pub fn source_doc_count(&self, source_index: usize) -> u32 {
        (self.source_starts[source_index + 1] - self.source_starts[source_index]) as u32
    }

    pub fn target_segment_count(&self) -> usize {
        self.target_doc_counts.len()
    }

    /// Doc count of every target, zero-doc targets included.
    pub fn target_doc_counts(&self) -> &[u32] {
        &self.target_doc_counts
    }

    pub fn new_doc_count(&self) -> u32 {
        self.target_doc_counts.iter().sum()
    }

    pub fn deleted_doc_count(&self) -> u32 {
        self.entries.iter().filter(|&&e| e == DROPPED).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use ahash::AHashSet;

    use super::*;
    use crate::split_strategy::DefaultSplitStrategy;

    struct ModuloSplit(usize);

    impl SegmentSplitStrategy for ModuloSplit {
        fn name(&self) -> &str {
            "modulo"
        }

        fn target_segment_count(&self) -> usize {
            self.0
        }

        fn process(&self, source_index: usize, local_doc_id: DocId) -> Result<usize> {
            Ok((source_index + local_doc_id as usize) % self.0)
        }
    }

    #[test]
    fn test_two_sources_one_deleted() {
        let map = ReclaimMap::build_with(
            &[0, 1],
            &[3, 2],
            |source, doc| source == 0 && doc == 1,
            &DefaultSplitStrategy,
        )
        .unwrap();
        assert_eq!(map.new_doc_count(), 4);
        assert_eq!(map.deleted_doc_count(), 1);
        assert_eq!(map.get_new_id(0, 0), Some(0));
        assert_eq!(map.get_new_id(0, 1), None);
        assert_eq!(map.get_new_id(0, 2), Some(1));
        assert_eq!(map.get_new_id(1, 0), Some(2));
        assert_eq!(map.get_new_id(1, 1), Some(3));
        assert_eq!(map.get_target_segment_index(1, 1), Some(0));
        assert_eq!(map.get_new_id(1, 2), None);
        assert_eq!(map.get_new_id(2, 0), None);
    }

    #[test]
    fn test_fully_deleted_sources_keep_zero_doc_targets() {
        let map =
            ReclaimMap::build_with(&[4, 9], &[2, 3], |_, _| true, &ModuloSplit(2)).unwrap();
        assert_eq!(map.target_doc_counts(), &[0, 0]);
        assert_eq!(map.target_segment_count(), 2);
        assert_eq!(map.new_doc_count(), 0);
        assert_eq!(map.source_doc_count(1), 3);
    }

    #[test]
    fn test_density_and_conservation_on_random_input() {
        let mut rng = fastrand::Rng::with_seed(42);
        for _ in 0..20 {
            let sources = rng.usize(1..5);
            let ids = (0..sources as u32).map(|i| i * 3).collect::<Vec<_>>();
            let counts = (0..sources).map(|_| rng.u32(0..200)).collect::<Vec<_>>();
            let deleted = counts
                .iter()
                .map(|&c| (0..c).filter(|_| rng.bool()).collect::<AHashSet<_>>())
                .collect::<Vec<_>>();
            let targets = rng.usize(1..4);
            let map = ReclaimMap::build_with(
                &ids,
                &counts,
                |s, d| deleted[s].contains(&d),
                &ModuloSplit(targets),
            )
            .unwrap();

            let mut assigned = vec![Vec::new(); targets];
            for (s, &count) in counts.iter().enumerate() {
                for d in 0..count {
                    match (map.get_target_segment_index(s, d), map.get_local_id(s, d)) {
                        (Some(t), Some(l)) => assigned[t].push(l),
                        (None, None) => assert!(deleted[s].contains(&d)),
                        other => panic!("inconsistent entry {other:?}"),
                    }
                }
            }
            for (t, mut ids) in assigned.into_iter().enumerate() {
                ids.sort_unstable();
                let expected = (0..map.target_doc_counts()[t]).collect::<Vec<_>>();
                assert_eq!(ids, expected);
            }
            let total = counts.iter().sum::<u32>();
            let dropped = deleted.iter().map(|d| d.len() as u32).sum::<u32>();
            assert_eq!(map.new_doc_count(), total - dropped);
        }
    }

    #[test]
    fn test_sources_must_be_ascending() {
        let err = ReclaimMap::build_with(&[2, 1], &[1, 1], |_, _| false, &DefaultSplitStrategy);
        assert!(err.is_err());
    }
}
