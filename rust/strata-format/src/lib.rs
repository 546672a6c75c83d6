//! Persisted formats and configuration inputs of a partition: schema, build/merge options,
//! segment and version metadata, data sidecars, on-disk naming and checksums.

pub mod checksum;
pub mod config;
pub mod data_info;
pub mod layout;
pub mod schema;
pub mod segment_info;
pub mod version;

pub use config::{BuildConfig, MergeConfig, PartitionOptions, SplitConfig};
pub use data_info::DataInfo;
pub use schema::{FieldConfig, FieldType, PackConfig, Schema, SortField, SortOrder};
pub use segment_info::{Locator, SegmentInfo};
pub use version::Version;
