//! Segment merging: doc id reclamation, split strategies, merge ordering, task
//! scheduling across merge instances and the version switch.

pub mod attribute_merger;
pub mod executor;
pub mod merge_info_heap;
pub mod plan;
pub mod policy;
pub mod reclaim_map;
pub mod registry;
pub mod scheduler;
pub mod split_strategy;

pub use attribute_merger::{AttributeMergeContext, AttributeMerger, DefaultAttributeMerger};
pub use executor::MergeExecutor;
pub use merge_info_heap::{DocumentMergeInfo, DocumentMergeInfoHeap};
pub use plan::{MergePlan, MergeResult, PlanOutcome};
pub use policy::{MergePolicy, OptimizeMergePolicy, SegmentMergeInfo};
pub use reclaim_map::ReclaimMap;
pub use registry::{AttributeMergerFactory, PluginRegistry, SplitStrategyFactory};
pub use scheduler::{MergeTaskItem, MergeTaskScheduler};
pub use split_strategy::{
    DefaultSplitStrategy, SegmentSplitStrategy, SplitContext, TimeSeriesSplitStrategy,
};
