use serde::{Deserialize, Serialize};
use strata_common::error::Error;

/// Checkpoint in the source document stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct Locator {
    pub src: u64,
    pub offset: i64,
}

impl Locator {
    pub fn new(src: u64, offset: i64) -> Locator {
        Locator { src, offset }
    }
}

/// Per-segment metadata persisted as `segment_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentInfo {
    pub doc_count: u32,
    pub locator: Locator,
    pub timestamp: i64,
    /// Produced by a merge rather than by a direct build.
    pub merged: bool,
    pub schema_version_id: u32,
    /// Number of shards of the sharding column; 1 when the segment is not sharded.
    pub shard_count: u32,
}

impl SegmentInfo {
    pub fn new(doc_count: u32) -> SegmentInfo {
        SegmentInfo {
            doc_count,
            shard_count: 1,
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> strata_common::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::json("segment_info", e))
    }

    pub fn from_json(buf: &[u8]) -> strata_common::Result<SegmentInfo> {
        serde_json::from_slice(buf).map_err(|e| Error::json("segment_info", e))
    }
}
