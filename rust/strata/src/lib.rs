//! # Strata: segment-oriented attribute storage
//!
//! Strata stores documents as per-field attribute columns inside segments. A
//! partition holds one in-memory building segment that receives added documents and
//! any number of immutable built segments on disk. Field updates of built segments are
//! recorded as patches, deletes as deletion maps, and the set of segments making up
//! the partition is published as numbered versions. Merging rewrites several built
//! segments into fewer ones, dropping deleted documents.
//!
//! ## Module Organization
//!
//! * [`common`] - Error taxonomy, result type and identifier aliases
//! * [`io`] - Positional reads, sealed writes and the [`io::Directory`] abstraction
//! * [`format`] - Schema and options, segment and version metadata, on-disk names
//! * [`attribute`] - Value codecs, offset tables, patch logs and attribute stores
//! * [`segment`] - Segments, deletion maps and versioned segment directories
//! * [`document`] - Documents, batches, same-key merging and sorting
//! * [`merge`] - Merge policies, doc id reclamation, task scheduling and execution
//! * [`partition`] - Build, dump, merge and read a partition
//!
//! The [`support`] module re-exports the generic building blocks:
//!
//! * [`support::budget_tracker`] - Memory quota accounting
//! * [`support::workflow`] - Fixed-size thread pool
//!
//! ## Getting Started
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use strata::{
//!     IndexPartition,
//!     document::{Document, DocumentBatch, PrimaryKey},
//!     format::{PartitionOptions, Schema},
//!     io::FsDirectory,
//!     merge::PluginRegistry,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Schema::from_json_str(
//!     r#"{
//!         "schema_version_id": 1,
//!         "fields": [
//!             { "id": 0, "name": "id", "field_type": "string" },
//!             { "id": 1, "name": "price", "field_type": "int64", "updatable": true }
//!         ],
//!         "primary_key": "id"
//!     }"#,
//! )?;
//! let dir = Arc::new(FsDirectory::new("/tmp/partition")?);
//! let mut partition = IndexPartition::open(
//!     dir,
//!     schema,
//!     PartitionOptions::default(),
//!     Arc::new(PluginRegistry::new()),
//! )?;
//!
//! let mut batch = DocumentBatch::new();
//! batch.push(Document::add().with_field("id", "a").with_field("price", 10i64));
//! partition.build(&batch, None)?;
//! partition.dump()?;
//!
//! let reader = partition.reader()?;
//! let price = reader.get(&PrimaryKey::from("a"), "price")?;
//! # Ok(())
//! # }
//! ```

pub use strata_attribute as attribute;
pub use strata_common as common;
pub use strata_document as document;
pub use strata_format as format;
pub use strata_io as io;
pub use strata_merge as merge;
pub use strata_partition as partition;
pub use strata_segment as segment;

pub use strata_common::{
    Result,
    error::{Error, ErrorKind},
};
pub use strata_partition::{BuildReport, IndexPartition, PartitionReader};

pub mod support {
    pub use strata_budget_tracker as budget_tracker;
    pub use strata_workflow as workflow;
}
