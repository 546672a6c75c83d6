use serde::{Deserialize, Serialize};
use strata_common::{
    error::Error,
    ids::{INVALID_SEGMENT_ID, INVALID_VERSION_ID, SegmentId, VersionId},
};

use crate::{layout::VERSION_PREFIX, segment_info::Locator};

/// Immutable, numbered snapshot of the segment set of a partition.
///
/// Segments are kept in ascending id order, which is also the order their doc ids are
/// laid out in the global doc id space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Version {
    pub version_id: VersionId,
    pub segments: Vec<SegmentId>,
    pub schema_version_id: u32,
    pub timestamp: i64,
    pub locator: Locator,
    /// Highest segment id ever referenced by this or an earlier version.
    pub last_segment_id: SegmentId,
}

impl Default for Version {
    fn default() -> Self {
        Version {
            version_id: INVALID_VERSION_ID,
            segments: Vec::new(),
            schema_version_id: 0,
            timestamp: 0,
            locator: Locator::default(),
            last_segment_id: INVALID_SEGMENT_ID,
        }
    }
}

impl Version {
    pub fn new(version_id: VersionId) -> Version {
        Version {
            version_id,
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.version_id != INVALID_VERSION_ID
    }

    pub fn has_segment(&self, segment_id: SegmentId) -> bool {
        self.segments.binary_search(&segment_id).is_ok()
    }

    /// Adds the segment, keeping the list sorted. Returns `false` if it was present.
    pub fn add_segment(&mut self, segment_id: SegmentId) -> bool {
        match self.segments.binary_search(&segment_id) {
            Ok(_) => false,
            Err(pos) => {
                self.segments.insert(pos, segment_id);
                if self.last_segment_id == INVALID_SEGMENT_ID || segment_id > self.last_segment_id
                {
                    self.last_segment_id = segment_id;
                }
                true
            }
        }
    }

    pub fn remove_segment(&mut self, segment_id: SegmentId) -> bool {
        match self.segments.binary_search(&segment_id) {
            Ok(pos) => {
                self.segments.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn file_name(&self) -> String {
        Self::file_name_for(self.version_id)
    }

    pub fn file_name_for(version_id: VersionId) -> String {
        format!("{VERSION_PREFIX}{version_id}")
    }

    pub fn parse_file_name(name: &str) -> Option<VersionId> {
        name.strip_prefix(VERSION_PREFIX)?
            .parse()
            .ok()
            .filter(|&id| id != INVALID_VERSION_ID)
    }

    pub fn to_json(&self) -> strata_common::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::json("version", e))
    }

    pub fn from_json(buf: &[u8]) -> strata_common::Result<Version> {
        let mut version: Version =
            serde_json::from_slice(buf).map_err(|e| Error::json("version", e))?;
        version.segments.sort_unstable();
        version.segments.dedup();
        Ok(version)
    }
}
