//! Identifier aliases shared by all strata crates.

/// Zero-based document ordinal, either segment-local or partition-global.
pub type DocId = u32;

/// Monotonic, never reused segment identifier within a partition.
pub type SegmentId = u32;

/// Identifier of an attribute: a single field or a pack of fields.
pub type AttrId = u16;

/// Numbered, immutable snapshot of the partition's segment set.
pub type VersionId = u32;

pub const INVALID_DOC_ID: DocId = DocId::MAX;

pub const INVALID_SEGMENT_ID: SegmentId = SegmentId::MAX;

pub const INVALID_VERSION_ID: VersionId = VersionId::MAX;
