//! Catalog of the segments that make up a partition.
//!
//! Mutations (`add_segment`, `remove_segments`, `replace_segments`, `commit_version`)
//! go through a single mutex over the working catalog. The last committed [`Version`] is published as an
//! immutable `Arc`, so readers never take the catalog lock.
//!
//! Segment ids are handed out from a persisted high-water mark (`segment_id_hwm`), so
//! an id is never reused, even for segments that were never committed.

use std::sync::{Arc, Mutex, RwLock};

use ahash::AHashMap;
use strata_common::{
    Result,
    error::Error,
    ids::{INVALID_SEGMENT_ID, SegmentId, VersionId},
};
use strata_format::{SegmentInfo, Version, layout};
use strata_io::{Directory, join_path};

use crate::tracker::{SegmentTracker, VersionSnapshot};

/// Size of one segment id space; masked id spaces start at multiples of it.
pub const SEGMENT_ID_SPACE: SegmentId = 1 << 29;

struct Catalog {
    working: Version,
    infos: AHashMap<SegmentId, SegmentInfo>,
    /// Next unmasked segment id.
    next_segment_id: SegmentId,
    next_version_id: VersionId,
    retired: Vec<SegmentId>,
    changed: bool,
}

pub struct SegmentDirectory {
    dir: Arc<dyn Directory>,
    root: String,
    id_mask: SegmentId,
    read_only: bool,
    catalog: Mutex<Catalog>,
    published: RwLock<Arc<Version>>,
    tracker: Arc<SegmentTracker>,
}

impl SegmentDirectory {
    /// Opens the segment directory rooted at `root`, recovering the latest committed
    /// version. Segment directories not referenced by that version are left over from
    /// an interrupted build or merge and are removed.
    pub fn open(dir: Arc<dyn Directory>, root: impl Into<String>) -> Result<SegmentDirectory> {
        Self::open_with_mask(dir, root, 0)
    }

    /// Like [`SegmentDirectory::open`], with segment ids drawn from the id space marked
    /// by `id_mask`.
    pub fn open_with_mask(
        dir: Arc<dyn Directory>,
        root: impl Into<String>,
        id_mask: SegmentId,
    ) -> Result<SegmentDirectory> {
        let root = root.into();
        dir.create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        let entries = dir.list(&root).map_err(|e| Error::io(&root, e))?;
        let (directory, orphans) = Self::load(dir, root, id_mask, &entries, false)?;
        for id in orphans {
            let path = directory.segment_path(id);
            log::info!("removing uncommitted segment directory {path}");
            directory
                .dir
                .remove_dir_all(&path)
                .map_err(|e| Error::io(&path, e))?;
        }
        Ok(directory)
    }

    /// Loads the latest committed version for reading only. Nothing is written or
    /// removed, so segments a writer has not committed yet are left alone; the
    /// returned directory refuses every mutation.
    pub fn open_read_only(
        dir: Arc<dyn Directory>,
        root: impl Into<String>,
    ) -> Result<SegmentDirectory> {
        let root = root.into();
        let entries = match dir.list(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(Error::io(&root, e)),
        };
        Self::load(dir, root, 0, &entries, true).map(|(directory, _)| directory)
    }

    /// Recovers the latest version from the `entries` of `root`. Also returns the
    /// segment directories of the id space that the version does not reference.
    fn load(
        dir: Arc<dyn Directory>,
        root: String,
        id_mask: SegmentId,
        entries: &[String],
        read_only: bool,
    ) -> Result<(SegmentDirectory, Vec<SegmentId>)> {
        let version_ids = entries
            .iter()
            .filter_map(|name| Version::parse_file_name(name))
            .collect::<Vec<_>>();
        let published = match version_ids.iter().max() {
            Some(&id) => {
                let path = join_path(&root, &Version::file_name_for(id));
                Version::from_json(&dir.read_file(&path).map_err(|e| Error::io(&path, e))?)?
            }
            None => Version::default(),
        };

        let mut next_segment_id = 0;
        if published.last_segment_id != INVALID_SEGMENT_ID {
            next_segment_id = (published.last_segment_id & !id_mask) + 1;
        }
        let hwm_path = join_path(&root, layout::SEGMENT_ID_HWM_FILE);
        if dir.exists(&hwm_path) {
            let buf = dir.read_file(&hwm_path).map_err(|e| Error::io(&hwm_path, e))?;
            let hwm = std::str::from_utf8(&buf)
                .ok()
                .and_then(|s| s.trim().parse::<SegmentId>().ok())
                .ok_or_else(|| Error::corrupt_data(layout::SEGMENT_ID_HWM_FILE, "not a number"))?;
            next_segment_id = next_segment_id.max(hwm + 1);
        }

        let mut orphans = Vec::new();
        for name in entries {
            let Some(id) = layout::parse_segment_dir_name(name) else {
                continue;
            };
            if id & id_mask != id_mask {
                continue;
            }
            next_segment_id = next_segment_id.max((id & !id_mask) + 1);
            if !published.has_segment(id) {
                orphans.push(id);
            }
        }

        let next_version_id = version_ids.iter().max().map_or(0, |id| id + 1);
        let mut working = published.clone();
        working.version_id = next_version_id;
        let directory = SegmentDirectory {
            dir,
            root,
            id_mask,
            read_only,
            catalog: Mutex::new(Catalog {
                working,
                infos: AHashMap::new(),
                next_segment_id,
                next_version_id,
                retired: Vec::new(),
                changed: false,
            }),
            published: RwLock::new(Arc::new(published)),
            tracker: Arc::new(SegmentTracker::new()),
        };
        Ok((directory, orphans))
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn check_writable(&self, operation: &str) -> Result<()> {
        if self.read_only {
            return Err(Error::invalid_operation(format!(
                "{operation} in a read-only segment directory"
            )));
        }
        Ok(())
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.dir
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn id_mask(&self) -> SegmentId {
        self.id_mask
    }

    /// Path of a segment's directory relative to the underlying [`Directory`].
    pub fn segment_path(&self, segment_id: SegmentId) -> String {
        join_path(&self.root, &layout::segment_dir_name(segment_id))
    }

    /// Allocates a segment id, persisting the new high-water mark before returning it.
    pub fn create_new_segment_id(&self) -> Result<SegmentId> {
        self.check_writable("allocate a segment id")?;
        let mut catalog = self.catalog.lock().expect("catalog lock");
        let id = catalog.next_segment_id;
        if id >= SEGMENT_ID_SPACE {
            return Err(Error::resource_exhausted("segment id space", 1));
        }
        let path = join_path(&self.root, layout::SEGMENT_ID_HWM_FILE);
        self.dir
            .write_file(&path, id.to_string().as_bytes())
            .map_err(|e| Error::io(&path, e))?;
        catalog.next_segment_id = id + 1;
        Ok(self.id_mask | id)
    }

    /// Adds a durable segment to the working version.
    pub fn add_segment(&self, segment_id: SegmentId, info: &SegmentInfo) -> Result<()> {
        self.check_writable("add a segment")?;
        let mut catalog = self.catalog.lock().expect("catalog lock");
        self.check_allocated(&catalog, segment_id)?;
        Self::stage_add(&mut catalog.working, segment_id, info)?;
        catalog.infos.insert(segment_id, info.clone());
        catalog.changed = true;
        Ok(())
    }

    /// Removes segments from the working version. Their files are deleted by
    /// [`SegmentDirectory::collect_garbage`] once a version without them has been
    /// committed and no snapshot references them.
    pub fn remove_segments(&self, segment_ids: &[SegmentId]) -> Result<()> {
        self.check_writable("remove segments")?;
        let mut catalog = self.catalog.lock().expect("catalog lock");
        Self::stage_remove(&mut catalog.working, segment_ids)?;
        for &id in segment_ids {
            catalog.infos.remove(&id);
            catalog.retired.push(id);
        }
        catalog.changed = true;
        Ok(())
    }

    /// Adds `added`, removes `removed` and commits the result in one step. The working
    /// version only changes once the new version file is written; on error it is left
    /// as it was.
    pub fn replace_segments(
        &self,
        added: &[(SegmentId, SegmentInfo)],
        removed: &[SegmentId],
    ) -> Result<Arc<Version>> {
        self.check_writable("replace segments")?;
        let mut catalog = self.catalog.lock().expect("catalog lock");
        let mut working = catalog.working.clone();
        for (id, info) in added {
            self.check_allocated(&catalog, *id)?;
            Self::stage_add(&mut working, *id, info)?;
        }
        Self::stage_remove(&mut working, removed)?;
        let version = self.write_version(&catalog, &working)?;

        catalog.working = working;
        for (id, info) in added {
            catalog.infos.insert(*id, info.clone());
        }
        for id in removed {
            catalog.infos.remove(id);
        }
        catalog.retired.extend_from_slice(removed);
        Ok(self.publish(&mut catalog, version))
    }

    /// Whether the working version differs from the last committed one.
    pub fn is_version_changed(&self) -> bool {
        self.catalog.lock().expect("catalog lock").changed
    }

    /// Persists the working version as `version.<N>` and publishes it. Returns the
    /// current version unchanged if there is nothing to commit.
    pub fn commit_version(&self) -> Result<Arc<Version>> {
        let mut catalog = self.catalog.lock().expect("catalog lock");
        if !catalog.changed {
            return Ok(self.latest_version());
        }
        let version = self.write_version(&catalog, &catalog.working)?;
        Ok(self.publish(&mut catalog, version))
    }

    fn check_allocated(&self, catalog: &Catalog, segment_id: SegmentId) -> Result<()> {
        if segment_id & self.id_mask != self.id_mask
            || (segment_id & !self.id_mask) >= catalog.next_segment_id
        {
            return Err(Error::invalid_arg(
                "segment_id",
                format!("segment {segment_id} was not allocated by this directory"),
            ));
        }
        Ok(())
    }

    fn stage_add(working: &mut Version, segment_id: SegmentId, info: &SegmentInfo) -> Result<()> {
        if !working.add_segment(segment_id) {
            return Err(Error::invalid_arg(
                "segment_id",
                format!("segment {segment_id} is already in the version"),
            ));
        }
        working.timestamp = working.timestamp.max(info.timestamp);
        working.locator = working.locator.max(info.locator);
        working.schema_version_id = working.schema_version_id.max(info.schema_version_id);
        Ok(())
    }

    fn stage_remove(working: &mut Version, segment_ids: &[SegmentId]) -> Result<()> {
        if let Some(missing) = segment_ids.iter().find(|&&id| !working.has_segment(id)) {
            return Err(Error::invalid_arg(
                "segment_ids",
                format!("segment {missing} is not in the version"),
            ));
        }
        for &id in segment_ids {
            working.remove_segment(id);
        }
        Ok(())
    }

    /// Writes `working` as the next version file.
    fn write_version(&self, catalog: &Catalog, working: &Version) -> Result<Version> {
        if let Some(&missing) = working.segments.iter().find(|&&id| {
            !self
                .dir
                .exists(&join_path(&self.segment_path(id), layout::SEGMENT_INFO))
        }) {
            return Err(Error::invalid_operation(format!(
                "commit a version referencing segment {missing}, which is not durable"
            )));
        }
        let mut version = working.clone();
        version.version_id = catalog.next_version_id;
        let path = join_path(&self.root, &version.file_name());
        self.dir
            .write_file(&path, &version.to_json()?)
            .map_err(|e| Error::io(&path, e))?;
        Ok(version)
    }

    fn publish(&self, catalog: &mut Catalog, version: Version) -> Arc<Version> {
        let version = Arc::new(version);
        {
            let mut published = self.published.write().expect("version lock");
            *published = version.clone();
            let retired = std::mem::take(&mut catalog.retired);
            self.tracker.retire(&retired);
        }
        catalog.next_version_id += 1;
        catalog.working.version_id = catalog.next_version_id;
        catalog.changed = false;
        log::info!(
            "committed version {} with segments {:?}",
            version.version_id,
            version.segments
        );
        version
    }

    /// The last committed version. Invalid if nothing has been committed yet.
    pub fn latest_version(&self) -> Arc<Version> {
        self.published.read().expect("version lock").clone()
    }

    /// A copy of the working version, including uncommitted changes.
    pub fn working_version(&self) -> Version {
        self.catalog.lock().expect("catalog lock").working.clone()
    }

    /// Pins the last committed version for reading.
    pub fn snapshot(&self) -> VersionSnapshot {
        let published = self.published.read().expect("version lock");
        VersionSnapshot::new(published.clone(), self.tracker.clone())
    }

    /// Ids of every committed version file, ascending.
    pub fn list_versions(&self) -> Result<Vec<VersionId>> {
        let mut ids = self
            .dir
            .list(&self.root)
            .map_err(|e| Error::io(&self.root, e))?
            .iter()
            .filter_map(|name| Version::parse_file_name(name))
            .collect::<Vec<_>>();
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn load_version(&self, version_id: VersionId) -> Result<Version> {
        let path = join_path(&self.root, &Version::file_name_for(version_id));
        let buf = self.dir.read_file(&path).map_err(|e| Error::io(&path, e))?;
        Version::from_json(&buf)
    }

    /// Metadata of a segment, from the catalog or from its `segment_info` file.
    pub fn segment_info(&self, segment_id: SegmentId) -> Result<SegmentInfo> {
        if let Some(info) = self
            .catalog
            .lock()
            .expect("catalog lock")
            .infos
            .get(&segment_id)
        {
            return Ok(info.clone());
        }
        let path = join_path(&self.segment_path(segment_id), layout::SEGMENT_INFO);
        let buf = self.dir.read_file(&path).map_err(|e| Error::io(&path, e))?;
        let info = SegmentInfo::from_json(&buf)?;
        self.catalog
            .lock()
            .expect("catalog lock")
            .infos
            .insert(segment_id, info.clone());
        Ok(info)
    }

    pub fn tracker(&self) -> &Arc<SegmentTracker> {
        &self.tracker
    }

    /// Deletes the files of retired segments that are no longer referenced. Returns
    /// the removed segment ids.
    pub fn collect_garbage(&self) -> Result<Vec<SegmentId>> {
        self.check_writable("collect garbage")?;
        let ready = self.tracker.take_ready();
        for (i, &id) in ready.iter().enumerate() {
            let path = self.segment_path(id);
            if let Err(e) = self.dir.remove_dir_all(&path) {
                self.tracker.retire(&ready[i..]);
                return Err(Error::io(path, e));
            }
        }
        if !ready.is_empty() {
            log::info!("removed retired segments {ready:?}");
        }
        Ok(ready)
    }
}

impl std::fmt::Debug for SegmentDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentDirectory")
            .field("root", &self.root)
            .field("id_mask", &self.id_mask)
            .field("version", &self.latest_version().version_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use strata_common::error::ErrorKind;
    use strata_io::{FsDirectory, MemoryDirectory};

    use super::*;

    fn make_durable(
        dir: &dyn Directory,
        seg_dir: &SegmentDirectory,
        id: SegmentId,
        docs: u32,
    ) -> SegmentInfo {
        let info = SegmentInfo::new(docs);
        dir.write_file(
            &join_path(&seg_dir.segment_path(id), layout::SEGMENT_INFO),
            &info.to_json().unwrap(),
        )
        .unwrap();
        info
    }

    #[test]
    fn test_commit_and_recover() {
        let dir = Arc::new(MemoryDirectory::new());
        let seg_dir = SegmentDirectory::open(dir.clone(), "").unwrap();
        assert!(!seg_dir.latest_version().is_valid());

        let a = seg_dir.create_new_segment_id().unwrap();
        let b = seg_dir.create_new_segment_id().unwrap();
        assert_eq!((a, b), (0, 1));
        let info = make_durable(dir.as_ref(), &seg_dir, a, 3);
        seg_dir.add_segment(a, &info).unwrap();
        let info = make_durable(dir.as_ref(), &seg_dir, b, 2);
        seg_dir.add_segment(b, &info).unwrap();
        assert!(seg_dir.is_version_changed());

        let version = seg_dir.commit_version().unwrap();
        assert_eq!(version.version_id, 0);
        assert_eq!(version.segments, vec![0, 1]);
        assert!(!seg_dir.is_version_changed());
        assert_eq!(seg_dir.commit_version().unwrap().version_id, 0);

        let reopened = SegmentDirectory::open(dir.clone(), "").unwrap();
        assert_eq!(reopened.latest_version().segments, vec![0, 1]);
        assert_eq!(reopened.create_new_segment_id().unwrap(), 2);
        assert_eq!(reopened.segment_info(1).unwrap().doc_count, 2);
        assert_eq!(reopened.list_versions().unwrap(), vec![0]);
    }

    #[test]
    fn test_segment_ids_are_never_reused() {
        let dir = Arc::new(MemoryDirectory::new());
        let seg_dir = SegmentDirectory::open(dir.clone(), "").unwrap();
        for _ in 0..3 {
            seg_dir.create_new_segment_id().unwrap();
        }
        drop(seg_dir);
        let reopened = SegmentDirectory::open(dir, "").unwrap();
        assert_eq!(reopened.create_new_segment_id().unwrap(), 3);
    }

    #[test]
    fn test_uncommitted_segment_dirs_are_removed_on_open() {
        let dir = Arc::new(MemoryDirectory::new());
        let seg_dir = SegmentDirectory::open(dir.clone(), "").unwrap();
        let a = seg_dir.create_new_segment_id().unwrap();
        let info = make_durable(dir.as_ref(), &seg_dir, a, 1);
        seg_dir.add_segment(a, &info).unwrap();
        seg_dir.commit_version().unwrap();
        let b = seg_dir.create_new_segment_id().unwrap();
        make_durable(dir.as_ref(), &seg_dir, b, 1);
        drop(seg_dir);

        let reopened = SegmentDirectory::open(dir.clone(), "").unwrap();
        assert!(dir.exists("segment_0"));
        assert!(!dir.exists("segment_1"));
        assert_eq!(reopened.create_new_segment_id().unwrap(), 2);
    }

    #[test]
    fn test_read_only_open_leaves_uncommitted_segments() {
        let dir = Arc::new(MemoryDirectory::new());
        let seg_dir = SegmentDirectory::open(dir.clone(), "").unwrap();
        let a = seg_dir.create_new_segment_id().unwrap();
        let info = make_durable(dir.as_ref(), &seg_dir, a, 1);
        seg_dir.add_segment(a, &info).unwrap();
        seg_dir.commit_version().unwrap();
        let b = seg_dir.create_new_segment_id().unwrap();
        let info = make_durable(dir.as_ref(), &seg_dir, b, 1);

        let read_only = SegmentDirectory::open_read_only(dir.clone(), "").unwrap();
        assert!(read_only.is_read_only());
        assert_eq!(read_only.latest_version().segments, vec![a]);
        assert!(dir.exists("segment_1"));
        assert!(read_only.create_new_segment_id().is_err());
        assert!(read_only.add_segment(b, &info).is_err());

        // The writer still commits the segment it dumped.
        seg_dir.add_segment(b, &info).unwrap();
        assert_eq!(seg_dir.commit_version().unwrap().segments, vec![a, b]);
    }

    #[test]
    fn test_read_only_open_of_missing_root() {
        let dir = Arc::new(MemoryDirectory::new());
        let read_only = SegmentDirectory::open_read_only(dir.clone(), "part_0").unwrap();
        assert!(!read_only.latest_version().is_valid());
        assert!(!dir.exists("part_0"));
    }

    #[test]
    fn test_failed_replace_keeps_working_version() {
        let dir = Arc::new(MemoryDirectory::new());
        let seg_dir = SegmentDirectory::open(dir.clone(), "").unwrap();
        let mut sources = Vec::new();
        for _ in 0..2 {
            let id = seg_dir.create_new_segment_id().unwrap();
            let info = make_durable(dir.as_ref(), &seg_dir, id, 2);
            seg_dir.add_segment(id, &info).unwrap();
            sources.push(id);
        }
        seg_dir.commit_version().unwrap();

        let target = seg_dir.create_new_segment_id().unwrap();
        let info = make_durable(dir.as_ref(), &seg_dir, target, 4);
        dir.inject_write_failure(Some("version."));
        assert!(
            seg_dir
                .replace_segments(&[(target, info.clone())], &sources)
                .is_err()
        );
        assert_eq!(seg_dir.working_version().segments, sources);
        assert!(!seg_dir.is_version_changed());
        assert!(seg_dir.tracker().take_ready().is_empty());

        dir.inject_write_failure(None);
        let version = seg_dir.replace_segments(&[(target, info)], &sources).unwrap();
        assert_eq!(version.segments, vec![target]);
        assert_eq!(seg_dir.working_version().segments, vec![target]);
        assert_eq!(seg_dir.collect_garbage().unwrap(), sources);
    }

    #[test]
    fn test_add_and_remove_validation() {
        let dir = Arc::new(MemoryDirectory::new());
        let seg_dir = SegmentDirectory::open(dir.clone(), "").unwrap();
        let err = seg_dir.add_segment(5, &SegmentInfo::new(1)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));

        let a = seg_dir.create_new_segment_id().unwrap();
        seg_dir.add_segment(a, &SegmentInfo::new(1)).unwrap();
        assert!(seg_dir.add_segment(a, &SegmentInfo::new(1)).is_err());
        assert!(seg_dir.remove_segments(&[a, 9]).is_err());
        assert_eq!(seg_dir.working_version().segments, vec![a]);
    }

    #[test]
    fn test_commit_requires_durable_segments() {
        let dir = Arc::new(MemoryDirectory::new());
        let seg_dir = SegmentDirectory::open(dir.clone(), "").unwrap();
        let a = seg_dir.create_new_segment_id().unwrap();
        seg_dir.add_segment(a, &SegmentInfo::new(1)).unwrap();
        let err = seg_dir.commit_version().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidOperation { .. }));
        assert!(!seg_dir.latest_version().is_valid());
    }

    #[test]
    fn test_failed_commit_keeps_published_version() {
        let dir = Arc::new(MemoryDirectory::new());
        let seg_dir = SegmentDirectory::open(dir.clone(), "").unwrap();
        let a = seg_dir.create_new_segment_id().unwrap();
        let info = make_durable(dir.as_ref(), &seg_dir, a, 1);
        seg_dir.add_segment(a, &info).unwrap();
        seg_dir.commit_version().unwrap();

        let b = seg_dir.create_new_segment_id().unwrap();
        let info = make_durable(dir.as_ref(), &seg_dir, b, 1);
        seg_dir.add_segment(b, &info).unwrap();
        dir.inject_write_failure(Some("version."));
        assert!(seg_dir.commit_version().is_err());
        assert_eq!(seg_dir.latest_version().segments, vec![a]);
        assert!(seg_dir.is_version_changed());

        dir.inject_write_failure(None);
        let version = seg_dir.commit_version().unwrap();
        assert_eq!(version.version_id, 1);
        assert_eq!(version.segments, vec![a, b]);
    }

    #[test]
    fn test_removed_segments_wait_for_snapshots() {
        let dir = Arc::new(MemoryDirectory::new());
        let seg_dir = SegmentDirectory::open(dir.clone(), "").unwrap();
        let mut ids = Vec::new();
        for docs in [3, 2] {
            let id = seg_dir.create_new_segment_id().unwrap();
            let info = make_durable(dir.as_ref(), &seg_dir, id, docs);
            seg_dir.add_segment(id, &info).unwrap();
            ids.push(id);
        }
        seg_dir.commit_version().unwrap();
        let snapshot = seg_dir.snapshot();

        let merged = seg_dir.create_new_segment_id().unwrap();
        let info = make_durable(dir.as_ref(), &seg_dir, merged, 5);
        seg_dir.remove_segments(&ids).unwrap();
        seg_dir.add_segment(merged, &info).unwrap();
        // Nothing is deleted before the commit.
        assert!(seg_dir.collect_garbage().unwrap().is_empty());
        seg_dir.commit_version().unwrap();
        assert!(seg_dir.collect_garbage().unwrap().is_empty());
        assert!(dir.exists("segment_0"));
        assert_eq!(snapshot.version().segments, ids);

        drop(snapshot);
        assert_eq!(seg_dir.collect_garbage().unwrap(), ids);
        assert!(!dir.exists("segment_0"));
        assert!(!dir.exists("segment_1"));
        assert!(dir.exists("segment_2"));
    }

    #[test]
    fn test_masked_id_space_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path()).unwrap());
        let mask = 1 << 29;
        let seg_dir = SegmentDirectory::open_with_mask(dir.clone(), "rt", mask).unwrap();
        let id = seg_dir.create_new_segment_id().unwrap();
        assert_eq!(id, mask);
        let info = make_durable(dir.as_ref(), &seg_dir, id, 1);
        seg_dir.add_segment(id, &info).unwrap();
        seg_dir.commit_version().unwrap();
        assert!(tmp.path().join("rt").join("version.0").exists());

        let reopened = SegmentDirectory::open_with_mask(dir, "rt", mask).unwrap();
        assert_eq!(reopened.create_new_segment_id().unwrap(), mask | 1);
    }
}
