//! A partition of documents on top of the segment layer: encoding of documents into
//! building segments, primary key deduplication, update and delete routing, reader
//! snapshots, and the build / dump / merge cycle.

pub mod building_segment;
pub mod encoder;
pub mod modifier;
pub mod partition;
pub mod primary_key;
pub mod reader;

#[cfg(test)]
mod tests;

pub use building_segment::BuildingSegment;
pub use encoder::{DocumentEncoder, FieldSlot};
pub use modifier::{DedupAction, ModifyOutcome, PartitionModifier};
pub use partition::{BuildReport, IndexPartition};
pub use primary_key::{DocAddress, PrimaryKeyIndex};
pub use reader::PartitionReader;
