//! Routing of document operations to the segments of a partition.
//!
//! Every document goes through a duplicate check first:
//!
//! ```text
//! Add ──► dedup ──┬─► new key ─────────────────► insert into the building segment
//!                 ├─► key exists ──────────────► tombstone old doc, insert new one
//!                 └─► key exists, add-to-update ► rewrite as an update of the old doc
//! UpdateField ──────► update the fields of the live doc in place
//! Delete ───────────► tombstone the live doc
//! ```

use std::sync::Arc;

use ahash::AHashMap;
use strata_attribute::AttrValue;
use strata_common::{
    Result,
    error::Error,
    ids::{AttrId, SegmentId},
};
use strata_document::{DocOperation, Document, PrimaryKey};
use strata_format::Schema;
use strata_segment::SegmentData;

use crate::{
    building_segment::BuildingSegment,
    encoder::{DocumentEncoder, FieldSlot},
    primary_key::{DocAddress, PrimaryKeyIndex},
};

/// How an added document relates to the documents already in the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupAction {
    /// No live document has the key.
    Insert,
    /// The live document is tombstoned and the new one inserted.
    ReplaceExisting(DocAddress),
    /// The add only touches updatable fields and is applied as an update.
    RewriteAsUpdate(DocAddress),
}

/// What applying one document did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOutcome {
    Added(DocAddress),
    Updated(DocAddress),
    Deleted(DocAddress),
    /// An update or delete whose key has no live document.
    Skipped,
}

/// Encoded values of one document update, written together once every field is
/// known to be valid.
#[derive(Default)]
struct FieldUpdate {
    values: Vec<(AttrId, Vec<u8>, bool)>,
    /// Pack records with their changed sub-fields applied.
    packs: Vec<(AttrId, Vec<u8>)>,
}

impl FieldUpdate {
    fn apply(self, segment: &SegmentData, address: DocAddress) -> Result<()> {
        for (attr_id, encoded, is_null) in self.values {
            segment.update_field(address.doc_id, attr_id, &encoded, is_null)?;
        }
        for (attr_id, record) in self.packs {
            segment.update_field(address.doc_id, attr_id, &record, false)?;
        }
        Ok(())
    }
}

/// Applies document operations to the built segments and the building segment of a
/// partition, keeping the primary key index in step.
#[derive(Debug)]
pub struct PartitionModifier {
    schema: Arc<Schema>,
    encoder: Arc<DocumentEncoder>,
    segments: AHashMap<SegmentId, Arc<SegmentData>>,
    building: Option<BuildingSegment>,
    pk_index: PrimaryKeyIndex,
}

impl PartitionModifier {
    pub fn new(
        schema: Arc<Schema>,
        encoder: Arc<DocumentEncoder>,
        segments: impl IntoIterator<Item = Arc<SegmentData>>,
        pk_index: PrimaryKeyIndex,
    ) -> PartitionModifier {
        PartitionModifier {
            schema,
            encoder,
            segments: segments
                .into_iter()
                .map(|s| (s.segment_id(), s))
                .collect(),
            building: None,
            pk_index,
        }
    }

    /// Built segments by id.
    pub fn segments(&self) -> &AHashMap<SegmentId, Arc<SegmentData>> {
        &self.segments
    }

    /// A built segment or the building one.
    pub fn segment(&self, segment_id: SegmentId) -> Option<&Arc<SegmentData>> {
        self.segments.get(&segment_id).or_else(|| {
            self.building
                .as_ref()
                .map(BuildingSegment::segment)
                .filter(|s| s.segment_id() == segment_id)
        })
    }

    pub fn building(&self) -> Option<&BuildingSegment> {
        self.building.as_ref()
    }

    pub fn set_building(&mut self, building: BuildingSegment) -> Result<()> {
        if let Some(current) = &self.building {
            return Err(Error::invalid_operation(format!(
                "replace building segment {}",
                current.segment().segment_id()
            )));
        }
        self.building = Some(building);
        Ok(())
    }

    pub fn take_building(&mut self) -> Option<BuildingSegment> {
        self.building.take()
    }

    /// Registers a built segment, replacing any segment with the same id. Addresses
    /// into a reopened segment stay valid.
    pub fn insert_segment(&mut self, segment: Arc<SegmentData>) {
        self.segments.insert(segment.segment_id(), segment);
    }

    pub fn remove_segment(&mut self, segment_id: SegmentId) -> Option<Arc<SegmentData>> {
        self.segments.remove(&segment_id)
    }

    /// Snapshot of the current primary key index. Modifications made after the
    /// snapshot is taken are not visible through it.
    pub fn pk_index(&self) -> Arc<PrimaryKeyIndex> {
        Arc::new(self.pk_index.clone())
    }

    pub fn set_pk_index(&mut self, pk_index: PrimaryKeyIndex) {
        self.pk_index = pk_index;
    }

    /// Whether any segment holds mutations that have not been dumped.
    pub fn is_dirty(&self) -> bool {
        self.building.as_ref().is_some_and(|b| !b.is_empty())
            || self.segments.values().any(|s| s.is_dirty())
    }

    pub fn lookup(&self, key: &PrimaryKey) -> Option<DocAddress> {
        self.pk_index.get(key)
    }

    /// Applies one document.
    pub fn apply(&mut self, document: &Document) -> Result<ModifyOutcome> {
        match document.operation() {
            DocOperation::Add => match self.dedup_document(document)? {
                DedupAction::Insert => self.add_document(document),
                DedupAction::ReplaceExisting(old) => {
                    self.remove_document(old)?;
                    self.add_document(document)
                }
                DedupAction::RewriteAsUpdate(address) => {
                    let update = self
                        .try_rewrite_add_to_update(document)
                        .ok_or_else(|| Error::invalid_operation("rewrite add as update"))?;
                    self.update_document(address, &update)?;
                    Ok(ModifyOutcome::Updated(address))
                }
            },
            DocOperation::UpdateField => match self.resolve(document)? {
                Some((_, address)) => {
                    self.update_document(address, document)?;
                    Ok(ModifyOutcome::Updated(address))
                }
                None => Ok(ModifyOutcome::Skipped),
            },
            DocOperation::Delete => match self.resolve(document)? {
                Some((key, address)) => {
                    self.remove_document(address)?;
                    self.pk_index.remove(&key);
                    Ok(ModifyOutcome::Deleted(address))
                }
                None => Ok(ModifyOutcome::Skipped),
            },
        }
    }

    /// Decides how an added document is applied, given the live document of its key.
    pub fn dedup_document(&self, document: &Document) -> Result<DedupAction> {
        let Some(key) = document.primary_key(&self.schema) else {
            return Ok(DedupAction::Insert);
        };
        let Some(existing) = self.pk_index.get(&key) else {
            return Ok(DedupAction::Insert);
        };
        if self.is_rewritable_as_update(document) {
            Ok(DedupAction::RewriteAsUpdate(existing))
        } else {
            Ok(DedupAction::ReplaceExisting(existing))
        }
    }

    /// The update equivalent of an added document, when the schema allows adds of
    /// existing keys to become updates and every field besides the primary key is
    /// updatable.
    pub fn try_rewrite_add_to_update(&self, document: &Document) -> Option<Document> {
        if !self.is_rewritable_as_update(document) {
            return None;
        }
        let mut update = document.clone();
        update.set_operation(DocOperation::UpdateField);
        Some(update)
    }

    fn is_rewritable_as_update(&self, document: &Document) -> bool {
        if !self.schema.auto_add_to_update || document.operation() != DocOperation::Add {
            return false;
        }
        let pk = self.schema.primary_key.as_deref();
        document
            .fields()
            .filter(|(name, _)| Some(*name) != pk)
            .all(|(name, _)| self.schema.field(name).is_some_and(|f| f.updatable))
    }

    /// Overwrites one field of a live document.
    pub fn update_field(
        &mut self,
        address: DocAddress,
        field: &str,
        value: &AttrValue,
    ) -> Result<()> {
        let segment = self.segment_for(address)?;
        let mut update = FieldUpdate::default();
        self.stage_field(&segment, address, field, value, &mut update)?;
        update.apply(&segment, address)
    }

    /// Rewrites the bytes of one pack sub-field, leaving the rest of the record as is.
    pub fn update_pack_field(
        &mut self,
        address: DocAddress,
        attr_id: AttrId,
        index: usize,
        value: &AttrValue,
    ) -> Result<()> {
        let segment = self.segment_for(address)?;
        let mut update = FieldUpdate::default();
        Self::stage_pack_field(&segment, address, attr_id, index, value, &mut update)?;
        update.apply(&segment, address)
    }

    /// Checks and encodes one field of an update without writing it.
    fn stage_field(
        &self,
        segment: &SegmentData,
        address: DocAddress,
        field: &str,
        value: &AttrValue,
        update: &mut FieldUpdate,
    ) -> Result<()> {
        let config = self
            .schema
            .field(field)
            .ok_or_else(|| Error::schema_violation(field, "unknown field"))?;
        if !config.updatable {
            return Err(Error::schema_violation(field, "field is not updatable"));
        }
        match self.encoder.slot(field)? {
            FieldSlot::Attribute { attr_id } => {
                let store = segment.attribute(attr_id).ok_or_else(|| {
                    Error::schema_violation(field, "attribute is missing")
                        .in_segment(address.segment_id, None)
                })?;
                let codec = store
                    .config()
                    .codec()
                    .ok_or_else(|| Error::invalid_operation("field update of a pack attribute"))?;
                let encoded = codec.encode(value)?;
                update.values.push((attr_id, encoded, value.is_null()));
                Ok(())
            }
            FieldSlot::PackMember { attr_id, index } => {
                Self::stage_pack_field(segment, address, attr_id, index, value, update)
            }
        }
    }

    fn stage_pack_field(
        segment: &SegmentData,
        address: DocAddress,
        attr_id: AttrId,
        index: usize,
        value: &AttrValue,
        update: &mut FieldUpdate,
    ) -> Result<()> {
        let store = segment.attribute(attr_id).ok_or_else(|| {
            Error::invalid_arg("attr_id", format!("unknown attribute {attr_id}"))
                .in_segment(address.segment_id, None)
        })?;
        let layout = store
            .config()
            .pack()
            .ok_or_else(|| Error::invalid_operation("pack update of a plain attribute"))?;
        let pos = match update.packs.iter().position(|(id, _)| *id == attr_id) {
            Some(pos) => pos,
            None => {
                let (record, _) = store.read(address.doc_id)?;
                update.packs.push((attr_id, record));
                update.packs.len() - 1
            }
        };
        layout
            .repack(&mut update.packs[pos].1, index, value)
            .map_err(|e| e.in_segment(address.segment_id, Some(store.name())))
    }

    /// Tombstones a document. Its bytes stay in the segment until a merge drops them.
    pub fn remove_document(&mut self, address: DocAddress) -> Result<bool> {
        self.segment_for(address)?.delete_document(address.doc_id)
    }

    fn add_document(&mut self, document: &Document) -> Result<ModifyOutcome> {
        let building = self
            .building
            .as_ref()
            .ok_or_else(|| Error::invalid_operation("add a document without a building segment"))?;
        let doc_id = building.add_document(document)?;
        let address = DocAddress::new(building.segment().segment_id(), doc_id);
        if let Some(key) = document.primary_key(&self.schema) {
            self.pk_index.insert(key, address);
        }
        Ok(ModifyOutcome::Added(address))
    }

    /// Updates every field of `document`. All fields are checked and encoded before
    /// the first one is written.
    fn update_document(&mut self, address: DocAddress, document: &Document) -> Result<()> {
        let segment = self.segment_for(address)?;
        let pk = self.schema.primary_key.as_deref();
        let mut update = FieldUpdate::default();
        for (name, value) in document.fields() {
            if Some(name) != pk {
                self.stage_field(&segment, address, name, value, &mut update)?;
            }
        }
        update.apply(&segment, address)
    }

    /// Primary key of an update or delete and the live document holding it.
    fn resolve(&self, document: &Document) -> Result<Option<(PrimaryKey, DocAddress)>> {
        let key = document.primary_key(&self.schema).ok_or_else(|| {
            Error::invalid_arg(
                "document",
                format!("{:?} without a primary key", document.operation()),
            )
        })?;
        let address = self.pk_index.get(&key);
        if address.is_none() {
            log::debug!(
                "{:?} of key {key} skipped: no live document",
                document.operation()
            );
        }
        Ok(address.map(|a| (key, a)))
    }

    fn segment_for(&self, address: DocAddress) -> Result<Arc<SegmentData>> {
        self.segment(address.segment_id).cloned().ok_or_else(|| {
            Error::invalid_arg(
                "segment_id",
                format!("segment {} is not part of the partition", address.segment_id),
            )
        })
    }
}
