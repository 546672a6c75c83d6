//! File and directory names of the on-disk partition layout.
//!
//! ```text
//! <partition>/
//!   version.<N>
//!   segment_id_hwm
//!   segment_<id>/
//!     segment_info
//!     deletionmap
//!     attribute/<name>/{data, offset, data_info, offset.extend64, extend_slice_data}
//!     patch/<generation>.patch
//! ```

use strata_common::ids::SegmentId;

pub const SEGMENT_INFO: &str = "segment_info";
pub const ATTRIBUTE_DIR: &str = "attribute";
pub const DATA_FILE: &str = "data";
pub const OFFSET_FILE: &str = "offset";
pub const DATA_INFO_FILE: &str = "data_info";
pub const OFFSET_EXTEND_FILE: &str = "offset.extend64";
pub const EXTEND_SLICE_DATA_FILE: &str = "extend_slice_data";
pub const DELETION_MAP_FILE: &str = "deletionmap";
pub const PATCH_DIR: &str = "patch";
pub const PATCH_SUFFIX: &str = ".patch";
pub const SEGMENT_ID_HWM_FILE: &str = "segment_id_hwm";
pub const VERSION_PREFIX: &str = "version.";
pub const SEGMENT_PREFIX: &str = "segment_";

pub fn segment_dir_name(segment_id: SegmentId) -> String {
    format!("{SEGMENT_PREFIX}{segment_id}")
}

pub fn parse_segment_dir_name(name: &str) -> Option<SegmentId> {
    name.strip_prefix(SEGMENT_PREFIX)?.parse().ok()
}

/// Relative path of one attribute's directory inside a segment directory.
pub fn attribute_dir(attribute_name: &str) -> String {
    format!("{ATTRIBUTE_DIR}/{attribute_name}")
}

pub fn patch_file_name(generation: u32) -> String {
    format!("{generation}{PATCH_SUFFIX}")
}

pub fn parse_patch_file_name(name: &str) -> Option<u32> {
    name.strip_suffix(PATCH_SUFFIX)?.parse().ok()
}
