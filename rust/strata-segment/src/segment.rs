//! In-memory form of one segment: its attribute stores, deletion map and pending
//! patches.
//!
//! A segment starts out `Building` (appendable, held only in memory), turns `Dumping`
//! while its files are written, and is reopened from disk as `Built`. Updates to a
//! built segment are applied to its stores and recorded in a collecting [`PatchLog`];
//! [`SegmentData::dump_patches`] persists them as `patch/<generation>.patch`, and
//! [`SegmentData::open`] replays every patch file over the base data.

use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicU32, Ordering},
};

use ahash::AHashMap;
use strata_attribute::{AttributeConfig, AttributeSegmentStore, PatchLog, patch::ReplayStats};
use strata_budget_tracker::MemoryQuota;
use strata_common::{
    Result,
    error::{Error, ErrorKind},
    ids::{AttrId, DocId, SegmentId},
    verify_arg,
};
use strata_format::{Locator, SegmentInfo, layout};
use strata_io::{Directory, join_path};

use crate::deletion_map::DeletionMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Building,
    Dumping,
    Built,
}

pub struct SegmentData {
    segment_id: SegmentId,
    path: String,
    state: RwLock<SegmentState>,
    info: RwLock<SegmentInfo>,
    doc_count: AtomicU32,
    attributes: Vec<Arc<AttributeSegmentStore>>,
    attribute_index: AHashMap<AttrId, usize>,
    deletion_map: DeletionMap,
    patches: Mutex<PatchLog>,
}

impl SegmentData {
    /// Creates an empty building segment holding one store per attribute.
    pub fn create_building(
        segment_id: SegmentId,
        path: impl Into<String>,
        configs: &[Arc<AttributeConfig>],
        schema_version_id: u32,
        quota: &MemoryQuota,
    ) -> Result<SegmentData> {
        let attributes = configs
            .iter()
            .map(|c| {
                AttributeSegmentStore::create_building(c.clone(), segment_id, quota).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        let mut info = SegmentInfo::new(0);
        info.schema_version_id = schema_version_id;
        Ok(SegmentData {
            segment_id,
            path: path.into(),
            state: RwLock::new(SegmentState::Building),
            info: RwLock::new(info),
            doc_count: AtomicU32::new(0),
            attribute_index: Self::index_attributes(&attributes),
            attributes,
            deletion_map: DeletionMap::new(0),
            patches: Mutex::new(PatchLog::new(0)),
        })
    }

    /// Opens a built segment from `path` and replays its patch files.
    pub fn open(
        dir: &dyn Directory,
        segment_id: SegmentId,
        path: impl Into<String>,
        configs: &[Arc<AttributeConfig>],
        quota: &MemoryQuota,
    ) -> Result<SegmentData> {
        let path = path.into();
        Self::open_impl(dir, segment_id, path, configs, quota).map_err(|e| match e.kind() {
            ErrorKind::InSegment { .. } => e,
            _ => e.in_segment(segment_id, None),
        })
    }

    fn open_impl(
        dir: &dyn Directory,
        segment_id: SegmentId,
        path: String,
        configs: &[Arc<AttributeConfig>],
        quota: &MemoryQuota,
    ) -> Result<SegmentData> {
        let info_path = join_path(&path, layout::SEGMENT_INFO);
        let info = SegmentInfo::from_json(
            &dir.read_file(&info_path)
                .map_err(|e| Error::io(&info_path, e))?,
        )?;
        let doc_count = info.doc_count;
        let attributes = configs
            .iter()
            .map(|c| {
                AttributeSegmentStore::open(dir, &path, c.clone(), segment_id, doc_count, quota)
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        let deletion_map = DeletionMap::load(dir, &path, doc_count)?;

        let segment = SegmentData {
            segment_id,
            state: RwLock::new(SegmentState::Built),
            info: RwLock::new(info),
            doc_count: AtomicU32::new(doc_count),
            attribute_index: Self::index_attributes(&attributes),
            attributes,
            deletion_map,
            patches: Mutex::new(PatchLog::new(0)),
            path,
        };
        let next_generation = segment.replay_patch_files(dir)?;
        *segment.patches.lock().expect("patch log lock") = PatchLog::new(next_generation);
        Ok(segment)
    }

    fn index_attributes(attributes: &[Arc<AttributeSegmentStore>]) -> AHashMap<AttrId, usize> {
        attributes
            .iter()
            .enumerate()
            .map(|(i, store)| (store.config().id, i))
            .collect()
    }

    /// Replays `patch/*.patch` in generation order. Returns the next free generation.
    fn replay_patch_files(&self, dir: &dyn Directory) -> Result<u32> {
        let patch_dir = join_path(&self.path, layout::PATCH_DIR);
        if !dir.exists(&patch_dir) {
            return Ok(0);
        }
        let mut generations = dir
            .list(&patch_dir)
            .map_err(|e| Error::io(&patch_dir, e))?
            .iter()
            .filter_map(|name| layout::parse_patch_file_name(name))
            .collect::<Vec<_>>();
        generations.sort_unstable();

        let mut total = ReplayStats::default();
        for &generation in &generations {
            let file = join_path(&patch_dir, &layout::patch_file_name(generation));
            let buf = dir.read_file(&file).map_err(|e| Error::io(&file, e))?;
            let mut patch_log = PatchLog::load(&buf, generation)?;
            let stats = patch_log.replay(
                |doc_id| self.deletion_map.is_deleted(doc_id),
                |record| {
                    let Some(store) = self.attribute(record.attr_id) else {
                        log::debug!(
                            "segment {}: patch for unknown attribute {} ignored",
                            self.segment_id,
                            record.attr_id
                        );
                        return Ok(());
                    };
                    // Already folded into the persisted extension.
                    if store
                        .applied_patch_generation()
                        .is_some_and(|applied| applied >= generation)
                    {
                        return Ok(());
                    }
                    store.update_field(record.doc_id, &record.value, record.is_null)
                },
            )?;
            patch_log.discard();
            total.applied += stats.applied;
            total.superseded += stats.superseded;
            total.skipped_deleted += stats.skipped_deleted;
        }
        log::debug!(
            "segment {}: replayed {} patch files ({} applied, {} superseded, {} deleted)",
            self.segment_id,
            generations.len(),
            total.applied,
            total.superseded,
            total.skipped_deleted
        );
        Ok(generations.last().map_or(0, |g| g + 1))
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Path of the segment directory, relative to the partition root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> SegmentState {
        *self.state.read().expect("state lock")
    }

    pub fn is_building(&self) -> bool {
        self.state() == SegmentState::Building
    }

    pub fn info(&self) -> SegmentInfo {
        let mut info = self.info.read().expect("info lock").clone();
        info.doc_count = self.doc_count();
        info
    }

    pub fn set_locator(&self, locator: Locator, timestamp: i64) {
        let mut info = self.info.write().expect("info lock");
        info.locator = info.locator.max(locator);
        info.timestamp = info.timestamp.max(timestamp);
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count.load(Ordering::Acquire)
    }

    pub fn live_count(&self) -> u32 {
        self.doc_count() - self.deletion_map.deleted_count()
    }

    pub fn attributes(&self) -> &[Arc<AttributeSegmentStore>] {
        &self.attributes
    }

    pub fn attribute(&self, attr_id: AttrId) -> Option<&Arc<AttributeSegmentStore>> {
        self.attribute_index
            .get(&attr_id)
            .map(|&i| &self.attributes[i])
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&Arc<AttributeSegmentStore>> {
        self.attributes.iter().find(|s| s.name() == name)
    }

    pub fn deletion_map(&self) -> &DeletionMap {
        &self.deletion_map
    }

    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.deletion_map.is_deleted(doc_id)
    }

    /// Appends one document to a building segment. `values` holds the encoded value of
    /// every attribute, in attribute order.
    pub fn add_document(&self, values: &[Vec<u8>]) -> Result<DocId> {
        if !self.is_building() {
            return Err(Error::invalid_operation(format!(
                "add a document to segment {} in state {:?}",
                self.segment_id,
                self.state()
            )));
        }
        verify_arg!(values, values.len() == self.attributes.len());
        for (store, value) in self.attributes.iter().zip(values) {
            let len = store
                .config()
                .encoded_len(value)
                .map_err(|e| Error::invalid_arg(store.name(), e.to_string()))?;
            verify_arg!(value, len == value.len());
        }

        let doc_id = self.doc_count();
        for (store, value) in self.attributes.iter().zip(values) {
            store
                .append(value)
                .map_err(|e| e.in_segment(self.segment_id, Some(store.name())))?;
        }
        self.deletion_map.grow(doc_id + 1)?;
        self.doc_count.store(doc_id + 1, Ordering::Release);
        Ok(doc_id)
    }

    /// Updates one attribute value. Updates of built segments are also recorded as
    /// patches.
    pub fn update_field(
        &self,
        doc_id: DocId,
        attr_id: AttrId,
        encoded: &[u8],
        is_null: bool,
    ) -> Result<()> {
        let state = self.state();
        if state == SegmentState::Dumping {
            return Err(Error::invalid_operation(format!(
                "update segment {} while it is dumping",
                self.segment_id
            )));
        }
        let store = self.attribute(attr_id).ok_or_else(|| {
            Error::invalid_arg("attr_id", format!("unknown attribute {attr_id}"))
        })?;
        verify_arg!(doc_id, doc_id < self.doc_count());
        if state != SegmentState::Built {
            return store
                .update_field(doc_id, encoded, is_null)
                .map_err(|e| e.in_segment(self.segment_id, Some(store.name())));
        }
        // Logged first, so an update visible in memory is always in the log.
        let mut patches = self.patches.lock().expect("patch log lock");
        patches
            .append(doc_id, attr_id, encoded, is_null)
            .map_err(|e| e.in_segment(self.segment_id, Some(store.name())))?;
        if let Err(e) = store.update_field(doc_id, encoded, is_null) {
            patches.pop();
            return Err(e.in_segment(self.segment_id, Some(store.name())));
        }
        Ok(())
    }

    /// Tombstones a document. Returns `false` if it was already deleted.
    pub fn delete_document(&self, doc_id: DocId) -> Result<bool> {
        verify_arg!(doc_id, doc_id < self.doc_count());
        self.deletion_map.delete(doc_id)
    }

    /// Number of updates recorded since the last patch dump.
    pub fn pending_patch_count(&self) -> usize {
        self.patches.lock().expect("patch log lock").len()
    }

    /// Whether the segment holds changes that are not on disk yet.
    pub fn is_dirty(&self) -> bool {
        match self.state() {
            SegmentState::Building => self.doc_count() > 0,
            SegmentState::Dumping => true,
            SegmentState::Built => {
                self.deletion_map.is_dirty() || self.pending_patch_count() > 0
            }
        }
    }

    /// Writes a building segment to its directory. The segment stays `Dumping`; the
    /// caller reopens the written files as a built segment. `segment_info` is written
    /// last, so a directory without it is incomplete.
    pub fn dump(&self, dir: &dyn Directory) -> Result<SegmentInfo> {
        {
            let mut state = self.state.write().expect("state lock");
            if *state != SegmentState::Building {
                return Err(Error::invalid_operation(format!(
                    "dump segment {} in state {:?}",
                    self.segment_id, *state
                )));
            }
            *state = SegmentState::Dumping;
        }
        let result = self.dump_impl(dir);
        if result.is_err() {
            *self.state.write().expect("state lock") = SegmentState::Building;
        }
        result.map_err(|e| match e.kind() {
            ErrorKind::InSegment { .. } => e,
            _ => e.in_segment(self.segment_id, None),
        })
    }

    fn dump_impl(&self, dir: &dyn Directory) -> Result<SegmentInfo> {
        dir.create_dir_all(&self.path)
            .map_err(|e| Error::io(&self.path, e))?;
        for store in &self.attributes {
            store
                .dump(dir, &self.path)
                .map_err(|e| e.in_segment(self.segment_id, Some(store.name())))?;
        }
        if self.deletion_map.deleted_count() > 0 {
            self.deletion_map.store(dir, &self.path)?;
        }
        let info = self.info();
        let info_path = join_path(&self.path, layout::SEGMENT_INFO);
        dir.write_file(&info_path, &info.to_json()?)
            .map_err(|e| Error::io(&info_path, e))?;
        log::info!(
            "segment {} dumped: {} docs, {} deleted",
            self.segment_id,
            info.doc_count,
            self.deletion_map.deleted_count()
        );
        Ok(info)
    }

    /// Persists the updates and deletions of a built segment. Returns the generation of
    /// the written patch file, if there were any updates.
    pub fn dump_patches(&self, dir: &dyn Directory) -> Result<Option<u32>> {
        if self.state() != SegmentState::Built {
            return Err(Error::invalid_operation(format!(
                "dump patches of segment {} in state {:?}",
                self.segment_id,
                self.state()
            )));
        }
        let mut patches = self.patches.lock().expect("patch log lock");
        let mut written = None;
        if !patches.is_empty() {
            let generation = patches.generation();
            // The live log keeps collecting until the files are written, so a
            // failed dump is retried with the same generation.
            let mut sealed = patches.clone();
            sealed.seal()?;
            let file = join_path(
                &join_path(&self.path, layout::PATCH_DIR),
                &layout::patch_file_name(generation),
            );
            dir.write_file(&file, &sealed.dump()?)
                .map_err(|e| Error::io(&file, e).in_segment(self.segment_id, None))?;
            for store in &self.attributes {
                if store.has_extension() {
                    store
                        .persist_extension(dir, &self.path, generation)
                        .map_err(|e| e.in_segment(self.segment_id, Some(store.name())))?;
                }
            }
            log::debug!(
                "segment {}: {} updates written to patch generation {generation}",
                self.segment_id,
                patches.len()
            );
            *patches = PatchLog::new(generation + 1);
            written = Some(generation);
        }
        if self.deletion_map.is_dirty() {
            self.deletion_map
                .store(dir, &self.path)
                .map_err(|e| e.in_segment(self.segment_id, None))?;
        }
        Ok(written)
    }

    pub fn memory_usage(&self) -> u64 {
        self.attributes.iter().map(|s| s.memory_usage()).sum()
    }
}

impl std::fmt::Debug for SegmentData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentData")
            .field("segment_id", &self.segment_id)
            .field("state", &self.state())
            .field("doc_count", &self.doc_count())
            .field("deleted", &self.deletion_map.deleted_count())
            .finish()
    }
}
