//! Selection of the segments to merge.

use strata_common::ids::SegmentId;
use strata_format::MergeConfig;

use crate::plan::MergePlan;

/// What a merge policy knows about one built segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMergeInfo {
    pub segment_id: SegmentId,
    pub doc_count: u32,
    pub deleted_count: u32,
}

pub trait MergePolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Plans the merges for `segments`, given in ascending segment id order. Plans
    /// never share a segment.
    fn plan(&self, segments: &[SegmentMergeInfo], config: &MergeConfig) -> Vec<MergePlan>;
}

/// Merges all segments into as few segments as `max_source_segments` allows.
///
/// A lone segment is only rewritten when it has deleted documents to reclaim.
#[derive(Debug, Default, Clone, Copy)]
pub struct OptimizeMergePolicy;

impl MergePolicy for OptimizeMergePolicy {
    fn name(&self) -> &str {
        "optimize"
    }

    fn plan(&self, segments: &[SegmentMergeInfo], config: &MergeConfig) -> Vec<MergePlan> {
        let chunk = config.max_source_segments.max(1);
        segments
            .chunks(chunk)
            .filter(|group| group.len() > 1 || group.iter().any(|s| s.deleted_count > 0))
            .map(|group| MergePlan::new(group.iter().map(|s| s.segment_id).collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(segment_id: SegmentId, deleted_count: u32) -> SegmentMergeInfo {
        SegmentMergeInfo {
            segment_id,
            doc_count: 10,
            deleted_count,
        }
    }

    #[test]
    fn test_optimize_merges_everything() {
        let plans = OptimizeMergePolicy.plan(
            &[info(0, 0), info(1, 0), info(4, 2)],
            &MergeConfig::default(),
        );
        assert_eq!(plans, vec![MergePlan::new(vec![0, 1, 4])]);
    }

    #[test]
    fn test_optimize_respects_max_sources() {
        let config = MergeConfig {
            max_source_segments: 2,
            ..Default::default()
        };
        let plans = OptimizeMergePolicy.plan(
            &[info(0, 0), info(1, 0), info(2, 0), info(3, 0), info(4, 0)],
            &config,
        );
        assert_eq!(
            plans,
            vec![MergePlan::new(vec![0, 1]), MergePlan::new(vec![2, 3])]
        );
    }

    #[test]
    fn test_single_clean_segment_is_left_alone() {
        let config = MergeConfig::default();
        assert!(OptimizeMergePolicy.plan(&[info(0, 0)], &config).is_empty());
        assert_eq!(OptimizeMergePolicy.plan(&[info(0, 1)], &config).len(), 1);
        assert!(OptimizeMergePolicy.plan(&[], &config).is_empty());
    }
}
