use serde::{Deserialize, Serialize};
use strata_common::error::Error;

/// Sidecar metadata of an attribute's `data` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataInfo {
    pub doc_count: u32,
    /// Number of distinct encoded values.
    pub uniq_item_count: u32,
    /// Length in bytes of the longest encoded value.
    pub max_item_len: u32,
    pub data_length: u64,
    /// Width in bytes of the base offset table entries (4 or 8); 0 for fixed-width attributes.
    pub offset_width: u8,
    pub data_checksum: u32,
    /// Highest patch generation already folded into the extension artifacts.
    pub extension_patch_generation: Option<u32>,
}

impl DataInfo {
    pub fn to_json(&self) -> strata_common::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::json("data_info", e))
    }

    pub fn from_json(buf: &[u8]) -> strata_common::Result<DataInfo> {
        serde_json::from_slice(buf).map_err(|e| Error::json("data_info", e))
    }
}
