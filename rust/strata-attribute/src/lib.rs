//! Attribute storage: value encoding, offset tables, per-segment attribute stores,
//! patch logs and pack attributes.

pub mod codec;
pub mod config;
pub mod memory;
pub mod offset_table;
pub mod pack;
pub mod patch;
pub mod segment_store;
pub mod writer;

pub use codec::{AttrValue, FixedValue, Scalar, ValueCodec};
pub use config::{AttributeConfig, AttributeKind};
pub use offset_table::OffsetTable;
pub use pack::PackLayout;
pub use patch::{PatchLog, PatchLogState, PatchRecord};
pub use segment_store::AttributeSegmentStore;
pub use writer::AttributeDataWriter;
