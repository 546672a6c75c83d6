//! Orchestration of one index partition: building, dumping and merging segments.

use std::{sync::Arc, time::Instant};

use strata_budget_tracker::MemoryQuota;
use strata_common::{Result, error::Error, ids::SegmentId};
use strata_document::{DocOperation, DocumentBatch, DocumentMerger, NormalSortDocSorter};
use strata_format::{Locator, PartitionOptions, Schema, Version};
use strata_io::Directory;
use strata_merge::{
    MergeExecutor, MergePolicy, MergeResult, OptimizeMergePolicy, PluginRegistry,
    SegmentMergeInfo,
};
use strata_segment::{SegmentData, SegmentDirectory};

use crate::{
    building_segment::BuildingSegment,
    encoder::DocumentEncoder,
    modifier::{ModifyOutcome, PartitionModifier},
    primary_key::PrimaryKeyIndex,
    reader::PartitionReader,
};

/// Counts of what one [`IndexPartition::build`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Operations in the batch.
    pub documents: usize,
    /// Operations left after same-key operations were merged.
    pub effective: usize,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Updates and deletes of keys without a live document.
    pub skipped: usize,
    /// Building segments dumped because they reached the segment size limit.
    pub dumped_segments: Vec<SegmentId>,
}

/// A partition of documents stored as a versioned set of segments in one
/// [`Directory`].
///
/// Added documents go to an in-memory building segment. [`IndexPartition::dump`]
/// writes it out, persists the updates and deletes of built segments, and commits a
/// new version. [`IndexPartition::merge`] rewrites built segments according to the
/// merge policy.
pub struct IndexPartition {
    dir: Arc<dyn Directory>,
    schema: Arc<Schema>,
    options: PartitionOptions,
    registry: Arc<PluginRegistry>,
    merge_policy: Box<dyn MergePolicy>,
    encoder: Arc<DocumentEncoder>,
    directory: SegmentDirectory,
    quota: MemoryQuota,
    merger: DocumentMerger,
    sorter: Option<NormalSortDocSorter>,
    modifier: PartitionModifier,
}

impl IndexPartition {
    /// Opens the partition stored in `dir`, creating an empty one if there is none.
    pub fn open(
        dir: Arc<dyn Directory>,
        schema: Schema,
        options: PartitionOptions,
        registry: Arc<PluginRegistry>,
    ) -> Result<IndexPartition> {
        schema.validate()?;
        options.validate()?;
        let schema = Arc::new(schema);
        let encoder = Arc::new(DocumentEncoder::new(&schema)?);
        let directory = SegmentDirectory::open(dir.clone(), "")?;
        let quota = MemoryQuota::new(options.build.memory_quota_bytes);

        let version = directory.working_version();
        if version.schema_version_id > schema.schema_version_id {
            return Err(Error::schema_violation(
                "schema_version_id",
                format!(
                    "partition holds segments of schema version {}, newer than {}",
                    version.schema_version_id, schema.schema_version_id
                ),
            ));
        }
        let segments = version
            .segments
            .iter()
            .map(|&id| {
                SegmentData::open(
                    dir.as_ref(),
                    id,
                    directory.segment_path(id),
                    encoder.attributes(),
                    &quota,
                )
                .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        let pk_index = match &schema.primary_key {
            Some(pk) => PrimaryKeyIndex::build(pk, segments.iter().map(Arc::as_ref))?,
            None => PrimaryKeyIndex::new(),
        };

        let sorter = if options.build.enable_sort {
            Some(NormalSortDocSorter::new(schema.clone())?).filter(|s| !s.is_empty())
        } else {
            None
        };
        log::info!(
            "partition opened at version {} with segments {:?}, {} primary keys",
            version.version_id,
            version.segments,
            pk_index.len()
        );
        Ok(IndexPartition {
            merger: DocumentMerger::new(schema.clone()),
            modifier: PartitionModifier::new(schema.clone(), encoder.clone(), segments, pk_index),
            dir,
            schema,
            options,
            registry,
            merge_policy: Box::new(OptimizeMergePolicy),
            encoder,
            directory,
            quota,
            sorter,
        })
    }

    pub fn set_merge_policy(&mut self, policy: impl MergePolicy + 'static) {
        self.merge_policy = Box::new(policy);
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn options(&self) -> &PartitionOptions {
        &self.options
    }

    pub fn segment_directory(&self) -> &SegmentDirectory {
        &self.directory
    }

    pub fn quota(&self) -> &MemoryQuota {
        &self.quota
    }

    /// The last committed version.
    pub fn version(&self) -> Arc<Version> {
        self.directory.latest_version()
    }

    /// Built segments of the working version followed by the building segment.
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        let mut ids = self.directory.working_version().segments;
        ids.extend(self.building_segment_id());
        ids
    }

    pub fn building_segment_id(&self) -> Option<SegmentId> {
        self.modifier
            .building()
            .map(|b| b.segment().segment_id())
    }

    /// Position of the newest document applied to the partition.
    pub fn locator(&self) -> Locator {
        let committed = self.directory.working_version().locator;
        match self.modifier.building() {
            Some(building) => committed.max(building.segment().info().locator),
            None => committed,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.modifier.is_dirty()
    }

    pub fn modifier(&self) -> &PartitionModifier {
        &self.modifier
    }

    /// Applies a batch of documents.
    ///
    /// Same-key operations of the batch are merged first, and added documents are
    /// sorted when sorting is enabled. `deadline` is checked before every document;
    /// when it passes, the documents applied so far stay applied and a `Timeout`
    /// error reports how many there were.
    pub fn build(
        &mut self,
        batch: &DocumentBatch,
        deadline: Option<Instant>,
    ) -> Result<BuildReport> {
        let merged = self.merger.merge(batch)?;
        let merged = match &self.sorter {
            Some(sorter) => sorter.sort(merged)?,
            None => merged,
        };
        let mut report = BuildReport {
            documents: batch.len(),
            effective: merged.len(),
            ..Default::default()
        };

        for (applied, item) in merged.iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::warn!(
                    "build deadline passed after {applied} of {} documents",
                    merged.len()
                );
                return Err(Error::timeout(format!(
                    "build applied {applied} of {} documents",
                    merged.len()
                )));
            }
            if item.document.operation() == DocOperation::Add {
                self.ensure_building()?;
            }
            match self.modifier.apply(&item.document)? {
                ModifyOutcome::Added(_) => report.added += 1,
                ModifyOutcome::Updated(_) => report.updated += 1,
                ModifyOutcome::Deleted(_) => report.deleted += 1,
                ModifyOutcome::Skipped => report.skipped += 1,
            }
            let full = self
                .modifier
                .building()
                .is_some_and(|b| b.doc_count() >= self.options.build.max_docs_per_segment);
            if full {
                report.dumped_segments.extend(self.building_segment_id());
                self.dump()?;
            }
        }
        log::debug!("build finished: {report:?}");
        Ok(report)
    }

    /// Writes the building segment and the pending updates and deletes of built
    /// segments, then commits a version if the segment set changed. Returns the
    /// committed version.
    pub fn dump(&mut self) -> Result<Option<Arc<Version>>> {
        if let Some(building) = self.modifier.take_building() {
            if building.is_empty() {
                log::debug!(
                    "empty building segment {} discarded",
                    building.segment().segment_id()
                );
            } else if let Err(e) = self.dump_building(&building) {
                self.modifier.set_building(building)?;
                return Err(e);
            }
        }

        for segment in self.modifier.segments().values() {
            if segment.is_dirty() {
                segment.dump_patches(self.dir.as_ref())?;
            }
        }

        if self.directory.is_version_changed() {
            return Ok(Some(self.directory.commit_version()?));
        }
        Ok(None)
    }

    fn dump_building(&mut self, building: &BuildingSegment) -> Result<()> {
        let segment = building.segment();
        let segment_id = segment.segment_id();
        let info = segment.dump(self.dir.as_ref())?;
        let reopened = SegmentData::open(
            self.dir.as_ref(),
            segment_id,
            segment.path(),
            self.encoder.attributes(),
            &self.quota,
        )?;
        self.directory.add_segment(segment_id, &info)?;
        self.modifier.insert_segment(Arc::new(reopened));
        Ok(())
    }

    /// Dumps pending changes and merges the built segments chosen by the merge
    /// policy. Returns `None` if the policy found nothing to merge.
    pub fn merge(&mut self) -> Result<Option<MergeResult>> {
        self.dump()?;
        let version = self.directory.working_version();
        let infos = version
            .segments
            .iter()
            .filter_map(|id| self.modifier.segments().get(id))
            .map(|s| SegmentMergeInfo {
                segment_id: s.segment_id(),
                doc_count: s.doc_count(),
                deleted_count: s.deletion_map().deleted_count(),
            })
            .collect::<Vec<_>>();
        let plans = self.merge_policy.plan(&infos, &self.options.merge);
        if plans.is_empty() {
            log::debug!("merge policy {} found nothing to merge", self.merge_policy.name());
            return Ok(None);
        }

        let result = MergeExecutor::new(
            &self.directory,
            &self.schema,
            self.encoder.attributes(),
            &self.registry,
            &self.options.merge,
            &self.quota,
        )?
        .execute(&plans, self.modifier.segments())?;

        for id in result.merged_segments().collect::<Vec<_>>() {
            self.modifier.remove_segment(id);
        }
        for id in result.new_segments().collect::<Vec<_>>() {
            let segment = SegmentData::open(
                self.dir.as_ref(),
                id,
                self.directory.segment_path(id),
                self.encoder.attributes(),
                &self.quota,
            )?;
            self.modifier.insert_segment(Arc::new(segment));
        }
        self.rebuild_pk_index()?;
        Ok(Some(result))
    }

    /// A reader over the last committed version and the building segment.
    pub fn reader(&self) -> Result<PartitionReader> {
        let snapshot = self.directory.snapshot();
        let mut segments = snapshot
            .segment_ids()
            .iter()
            .map(|id| {
                self.modifier.segments().get(id).cloned().ok_or_else(|| {
                    Error::invalid_operation(format!("read segment {id}, which is not open"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        segments.extend(self.modifier.building().map(|b| b.segment().clone()));
        Ok(PartitionReader::new(
            self.schema.clone(),
            self.encoder.clone(),
            snapshot,
            segments,
            self.modifier.pk_index(),
        ))
    }

    fn ensure_building(&mut self) -> Result<()> {
        if self.modifier.building().is_none() {
            let building = BuildingSegment::create(
                &self.directory,
                self.encoder.clone(),
                self.schema.schema_version_id,
                &self.quota,
            )?;
            self.modifier.set_building(building)?;
        }
        Ok(())
    }

    fn rebuild_pk_index(&mut self) -> Result<()> {
        let Some(pk) = &self.schema.primary_key else {
            return Ok(());
        };
        let version = self.directory.working_version();
        let mut segments = version
            .segments
            .iter()
            .filter_map(|id| self.modifier.segments().get(id))
            .map(Arc::as_ref)
            .collect::<Vec<_>>();
        if let Some(building) = self.modifier.building() {
            segments.push(building.segment().as_ref());
        }
        let pk_index = PrimaryKeyIndex::build(pk, segments)?;
        self.modifier.set_pk_index(pk_index);
        Ok(())
    }
}

impl std::fmt::Debug for IndexPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexPartition")
            .field("version", &self.directory.latest_version().version_id)
            .field("segments", &self.segment_ids())
            .field("merge_policy", &self.merge_policy.name())
            .finish()
    }
}
