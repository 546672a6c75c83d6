use std::sync::Arc;

use strata_common::ids::DocId;

use crate::reclaim_map::ReclaimMap;

/// One surviving document of a merge, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentMergeInfo {
    pub source_index: usize,
    pub old_doc_id: DocId,
    pub target_index: usize,
    pub new_doc_id: DocId,
}

/// Deterministic iteration over the surviving documents of a merge.
///
/// Sources are visited round-robin. A source's cursor skips dropped documents and stops
/// at a document that is not the next expected one of its target segment; the heap
/// then moves to the next source. Within every target segment, documents therefore
/// come out in exactly new local doc id order, even when a split strategy interleaves
/// the sources.
pub struct DocumentMergeInfoHeap {
    reclaim_map: Arc<ReclaimMap>,
    cursors: Vec<DocId>,
    next_expected: Vec<DocId>,
    current: usize,
    exhausted: usize,
}

impl DocumentMergeInfoHeap {
    pub fn new(reclaim_map: Arc<ReclaimMap>) -> DocumentMergeInfoHeap {
        let sources = reclaim_map.source_count();
        let exhausted = (0..sources)
            .filter(|&s| reclaim_map.source_doc_count(s) == 0)
            .count();
        DocumentMergeInfoHeap {
            cursors: vec![0; sources],
            next_expected: vec![0; reclaim_map.target_segment_count()],
            current: 0,
            exhausted,
            reclaim_map,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exhausted == self.cursors.len()
    }

    /// Returns the next document in output order, or `None` once every source cursor
    /// has reached its doc count.
    pub fn get_next(&mut self) -> Option<DocumentMergeInfo> {
        let sources = self.cursors.len();
        // Every full round either yields a document or exhausts a source.
        let mut idle = 0;
        while !self.is_empty() {
            let source = self.current;
            match self.advance(source) {
                Some(info) => return Some(info),
                None => {
                    self.current = (self.current + 1) % sources;
                    idle += 1;
                    debug_assert!(idle <= 2 * sources, "no source can make progress");
                }
            }
        }
        None
    }

    fn advance(&mut self, source: usize) -> Option<DocumentMergeInfo> {
        let doc_count = self.reclaim_map.source_doc_count(source);
        let cursor = &mut self.cursors[source];
        if *cursor >= doc_count {
            return None;
        }
        while *cursor < doc_count {
            let old_doc_id = *cursor;
            match (
                self.reclaim_map.get_target_segment_index(source, old_doc_id),
                self.reclaim_map.get_local_id(source, old_doc_id),
            ) {
                (Some(target), Some(new_doc_id)) => {
                    if self.next_expected[target] != new_doc_id {
                        return None;
                    }
                    self.next_expected[target] += 1;
                    *cursor += 1;
                    if *cursor == doc_count {
                        self.exhausted += 1;
                    }
                    return Some(DocumentMergeInfo {
                        source_index: source,
                        old_doc_id,
                        target_index: target,
                        new_doc_id,
                    });
                }
                _ => *cursor += 1,
            }
        }
        self.exhausted += 1;
        None
    }
}

impl Iterator for DocumentMergeInfoHeap {
    type Item = DocumentMergeInfo;

    fn next(&mut self) -> Option<DocumentMergeInfo> {
        self.get_next()
    }
}

#[cfg(test)]
mod tests {
    use strata_common::Result;

    use super::*;
    use crate::split_strategy::{DefaultSplitStrategy, SegmentSplitStrategy};

    struct EvenOdd;

    impl SegmentSplitStrategy for EvenOdd {
        fn name(&self) -> &str {
            "even_odd"
        }

        fn target_segment_count(&self) -> usize {
            2
        }

        fn process(&self, _source_index: usize, local_doc_id: DocId) -> Result<usize> {
            Ok(local_doc_id as usize % 2)
        }
    }

    #[test]
    fn test_single_target_order() {
        let map = ReclaimMap::build_with(
            &[0, 1],
            &[3, 2],
            |source, doc| source == 0 && doc == 1,
            &DefaultSplitStrategy,
        )
        .unwrap();
        let order = DocumentMergeInfoHeap::new(Arc::new(map))
            .map(|info| (info.source_index, info.old_doc_id, info.new_doc_id))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![(0, 0, 0), (0, 2, 1), (1, 0, 2), (1, 1, 3)]);
    }

    #[test]
    fn test_split_targets_are_written_in_new_id_order() {
        let map = ReclaimMap::build_with(
            &[0, 1, 2],
            &[5, 0, 4],
            |source, doc| source == 2 && doc == 2,
            &EvenOdd,
        )
        .unwrap();
        let map = Arc::new(map);
        let infos = DocumentMergeInfoHeap::new(map.clone()).collect::<Vec<_>>();
        assert_eq!(infos.len() as u32, map.new_doc_count());
        for target in 0..2 {
            let ids = infos
                .iter()
                .filter(|i| i.target_index == target)
                .map(|i| i.new_doc_id)
                .collect::<Vec<_>>();
            let expected = (0..map.target_doc_counts()[target]).collect::<Vec<_>>();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn test_all_deleted_is_empty() {
        let map =
            ReclaimMap::build_with(&[0], &[3], |_, _| true, &DefaultSplitStrategy).unwrap();
        let mut heap = DocumentMergeInfoHeap::new(Arc::new(map));
        assert!(heap.get_next().is_none());
        assert!(heap.is_empty());
    }

    #[test]
    fn test_no_sources() {
        let map = ReclaimMap::build_with(&[], &[], |_, _| false, &DefaultSplitStrategy).unwrap();
        assert!(DocumentMergeInfoHeap::new(Arc::new(map)).get_next().is_none());
    }
}
