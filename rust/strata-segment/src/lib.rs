//! Segments, deletion maps and the versioned segment catalog of a partition.

pub mod deletion_map;
pub mod directory;
pub mod online;
pub mod segment;
pub mod tracker;

pub use deletion_map::DeletionMap;
pub use directory::SegmentDirectory;
pub use online::{OnlineSegmentDirectory, REALTIME_SEGMENT_ID_MASK};
pub use segment::{SegmentData, SegmentState};
pub use tracker::{SegmentTracker, VersionSnapshot};
