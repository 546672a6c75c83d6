//! Build-side document model: operations, batches, per-key operation merging and
//! sort-key ordering.

pub mod batch;
pub mod document;
pub mod merger;
pub mod sorter;

pub use batch::{DocumentBatch, PrimaryKeyPositions};
pub use document::{DocOperation, Document, PrimaryKey};
pub use merger::{DocumentMerger, MergedDocument};
pub use sorter::NormalSortDocSorter;
