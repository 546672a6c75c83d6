use strata_common::ids::SegmentId;
use strata_format::{SegmentInfo, Version};

/// Source segments that are merged together into one or more target segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    sources: Vec<SegmentId>,
}

impl MergePlan {
    pub fn new(mut sources: Vec<SegmentId>) -> MergePlan {
        sources.sort_unstable();
        sources.dedup();
        MergePlan { sources }
    }

    /// Source segment ids, ascending.
    pub fn sources(&self) -> &[SegmentId] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Result of executing one [`MergePlan`].
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub sources: Vec<SegmentId>,
    /// Doc count of every target of the split, zero-doc targets included.
    pub target_doc_counts: Vec<u32>,
    /// Segments written for the targets that received documents.
    pub targets: Vec<(SegmentId, SegmentInfo)>,
    pub dropped_docs: u32,
}

/// Result of a merge: per-plan outcomes and the version that was committed.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub plans: Vec<PlanOutcome>,
    pub version: std::sync::Arc<Version>,
}

impl MergeResult {
    pub fn new_segments(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.plans
            .iter()
            .flat_map(|p| p.targets.iter().map(|(id, _)| *id))
    }

    pub fn merged_segments(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.plans.iter().flat_map(|p| p.sources.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_sources_are_sorted() {
        let plan = MergePlan::new(vec![5, 1, 3, 1]);
        assert_eq!(plan.sources(), &[1, 3, 5]);
        assert!(!plan.is_empty());
        assert!(MergePlan::new(vec![]).is_empty());
    }
}
