//! Read access to a pinned set of segments.
//!
//! Documents are addressed by global doc id: the segments of the reader are laid out
//! back to back in segment order, and a document's global id is its segment's base
//! doc id plus its local doc id.

use std::sync::Arc;

use strata_attribute::AttrValue;
use strata_budget_tracker::MemoryQuota;
use strata_common::{
    Result,
    error::Error,
    ids::{DocId, SegmentId},
};
use strata_document::{Document, PrimaryKey};
use strata_format::{Schema, Version};
use strata_io::Directory;
use strata_segment::{SegmentData, SegmentDirectory, VersionSnapshot};

use crate::{encoder::DocumentEncoder, primary_key::PrimaryKeyIndex};

struct ReaderSegment {
    base_doc_id: DocId,
    /// Documents visible to the reader; a building segment may have grown since.
    doc_count: u32,
    segment: Arc<SegmentData>,
}

/// A consistent view of the documents of a partition.
///
/// The committed segments of the view cannot be removed from disk while the reader
/// is alive. Field updates and deletes applied after the reader was taken are
/// visible through it; added documents are not.
pub struct PartitionReader {
    schema: Arc<Schema>,
    encoder: Arc<DocumentEncoder>,
    snapshot: VersionSnapshot,
    segments: Vec<ReaderSegment>,
    excluded: Vec<SegmentId>,
    pk_index: Arc<PrimaryKeyIndex>,
    doc_count: u32,
}

impl PartitionReader {
    pub(crate) fn new(
        schema: Arc<Schema>,
        encoder: Arc<DocumentEncoder>,
        snapshot: VersionSnapshot,
        segments: impl IntoIterator<Item = Arc<SegmentData>>,
        pk_index: Arc<PrimaryKeyIndex>,
    ) -> PartitionReader {
        let mut base_doc_id = 0;
        let segments = segments
            .into_iter()
            .map(|segment| {
                let doc_count = segment.doc_count();
                let entry = ReaderSegment {
                    base_doc_id,
                    doc_count,
                    segment,
                };
                base_doc_id += doc_count;
                entry
            })
            .collect();
        PartitionReader {
            schema,
            encoder,
            snapshot,
            segments,
            excluded: Vec::new(),
            pk_index,
            doc_count: base_doc_id,
        }
    }

    /// Opens the last committed version of the partition stored in `dir` for reading.
    ///
    /// Segments that fail to open because their data is corrupt are left out of the
    /// reader with a warning; any other failure is returned.
    pub fn open(
        dir: Arc<dyn Directory>,
        schema: Schema,
        quota: &MemoryQuota,
    ) -> Result<PartitionReader> {
        schema.validate()?;
        let encoder = Arc::new(DocumentEncoder::new(&schema)?);
        let directory = SegmentDirectory::open_read_only(dir.clone(), "")?;
        let snapshot = directory.snapshot();

        let mut segments = Vec::with_capacity(snapshot.segment_ids().len());
        let mut excluded = Vec::new();
        let mut pk_index = PrimaryKeyIndex::new();
        for &segment_id in snapshot.segment_ids() {
            let opened = SegmentData::open(
                dir.as_ref(),
                segment_id,
                directory.segment_path(segment_id),
                encoder.attributes(),
                quota,
            )
            .and_then(|segment| {
                let mut keys = PrimaryKeyIndex::new();
                if let Some(pk) = &schema.primary_key {
                    keys.load_segment(pk, &segment)?;
                }
                Ok((segment, keys))
            });
            match opened {
                Ok((segment, keys)) => {
                    for (key, address) in keys.iter() {
                        pk_index.insert(key.clone(), *address);
                    }
                    segments.push(Arc::new(segment));
                }
                Err(e) if e.is_corruption() => {
                    log::warn!("segment {segment_id} excluded from the reader: {e}");
                    excluded.push(segment_id);
                }
                Err(e) => return Err(e),
            }
        }

        let mut reader = PartitionReader::new(
            Arc::new(schema),
            encoder,
            snapshot,
            segments,
            Arc::new(pk_index),
        );
        reader.excluded = excluded;
        Ok(reader)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn version(&self) -> &Arc<Version> {
        self.snapshot.version()
    }

    /// Segments of the reader, in doc id order.
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments
            .iter()
            .map(|s| s.segment.segment_id())
            .collect()
    }

    /// Committed segments left out because their data is corrupt.
    pub fn excluded_segments(&self) -> &[SegmentId] {
        &self.excluded
    }

    /// Number of global doc ids, deleted documents included.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn live_count(&self) -> u32 {
        self.segments
            .iter()
            .map(|s| {
                let deleted = s
                    .segment
                    .deletion_map()
                    .deleted_docs()
                    .into_iter()
                    .filter(|&d| d < s.doc_count)
                    .count() as u32;
                s.doc_count - deleted
            })
            .sum()
    }

    /// `true` for deleted documents and for ids outside the reader.
    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        match self.locate(doc_id) {
            Some((segment, local)) => segment.segment.is_deleted(local),
            None => true,
        }
    }

    /// Global ids of the live documents, ascending.
    pub fn live_docs(&self) -> impl Iterator<Item = DocId> + '_ {
        self.segments.iter().flat_map(|s| {
            (0..s.doc_count)
                .filter(|&local| !s.segment.is_deleted(local))
                .map(move |local| s.base_doc_id + local)
        })
    }

    /// Reads one field of a document. Deleted documents keep their last values.
    pub fn field(&self, doc_id: DocId, field: &str) -> Result<AttrValue> {
        let (segment, local) = self.locate(doc_id).ok_or_else(|| {
            Error::invalid_arg(
                "doc_id",
                format!("doc {doc_id} is outside the reader ({} docs)", self.doc_count),
            )
        })?;
        self.encoder.read_field(&segment.segment, local, field)
    }

    /// Reads every field of a live document; `None` if it is deleted.
    pub fn document(&self, doc_id: DocId) -> Result<Option<Document>> {
        if self.is_deleted(doc_id) {
            return Ok(None);
        }
        let (segment, local) = self
            .locate(doc_id)
            .ok_or_else(|| Error::invalid_arg("doc_id", format!("doc {doc_id} is unknown")))?;
        self.encoder
            .read_document(&segment.segment, local)
            .map(Some)
    }

    /// Global doc id of the live document with primary key `key`.
    pub fn lookup(&self, key: &PrimaryKey) -> Option<DocId> {
        let address = self.pk_index.get(key)?;
        let segment = self
            .segments
            .iter()
            .find(|s| s.segment.segment_id() == address.segment_id)?;
        (address.doc_id < segment.doc_count && !segment.segment.is_deleted(address.doc_id))
            .then(|| segment.base_doc_id + address.doc_id)
    }

    /// One field of the live document with primary key `key`.
    pub fn get(&self, key: &PrimaryKey, field: &str) -> Result<Option<AttrValue>> {
        self.lookup(key)
            .map(|doc_id| self.field(doc_id, field))
            .transpose()
    }

    fn locate(&self, doc_id: DocId) -> Option<(&ReaderSegment, DocId)> {
        let pos = self
            .segments
            .partition_point(|s| s.base_doc_id <= doc_id)
            .checked_sub(1)?;
        let segment = &self.segments[pos];
        let local = doc_id - segment.base_doc_id;
        (local < segment.doc_count).then_some((segment, local))
    }
}

impl std::fmt::Debug for PartitionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionReader")
            .field("version_id", &self.version().version_id)
            .field("segments", &self.segment_ids())
            .field("excluded", &self.excluded)
            .field("doc_count", &self.doc_count)
            .finish()
    }
}
