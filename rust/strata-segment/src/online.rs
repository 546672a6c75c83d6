//! Segment directory of a partition that also indexes a realtime stream.
//!
//! The join sub-directory holds batch-built segments in the plain id space, at the
//! partition root. The realtime sub-directory (`rt/`) holds segments dumped from the
//! realtime stream, with ids drawn from [`REALTIME_SEGMENT_ID_MASK`]. In front of the
//! committed segments sit at most one building segment and any number of dumping ones.

use std::sync::{Arc, Mutex};

use strata_common::{Result, error::Error, ids::SegmentId};
use strata_format::SegmentInfo;
use strata_io::Directory;

use crate::directory::{SEGMENT_ID_SPACE, SegmentDirectory};

pub const REALTIME_SEGMENT_ID_MASK: SegmentId = SEGMENT_ID_SPACE;
pub const REALTIME_DIR: &str = "rt";

pub fn is_realtime_segment(segment_id: SegmentId) -> bool {
    segment_id & REALTIME_SEGMENT_ID_MASK != 0
}

#[derive(Debug, Default)]
struct InFlight {
    building: Option<SegmentId>,
    dumping: Vec<SegmentId>,
}

#[derive(Debug)]
pub struct OnlineSegmentDirectory {
    join: SegmentDirectory,
    realtime: SegmentDirectory,
    in_flight: Mutex<InFlight>,
}

impl OnlineSegmentDirectory {
    pub fn open(dir: Arc<dyn Directory>) -> Result<OnlineSegmentDirectory> {
        Ok(OnlineSegmentDirectory {
            join: SegmentDirectory::open(dir.clone(), "")?,
            realtime: SegmentDirectory::open_with_mask(dir, REALTIME_DIR, REALTIME_SEGMENT_ID_MASK)?,
            in_flight: Default::default(),
        })
    }

    pub fn join(&self) -> &SegmentDirectory {
        &self.join
    }

    pub fn realtime(&self) -> &SegmentDirectory {
        &self.realtime
    }

    /// The sub-directory owning `segment_id`.
    pub fn directory_of(&self, segment_id: SegmentId) -> &SegmentDirectory {
        if is_realtime_segment(segment_id) {
            &self.realtime
        } else {
            &self.join
        }
    }

    /// Allocates a realtime segment id and makes it the building segment.
    pub fn begin_building(&self) -> Result<SegmentId> {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock");
        if let Some(building) = in_flight.building {
            return Err(Error::invalid_operation(format!(
                "begin building while segment {building} is building"
            )));
        }
        let id = self.realtime.create_new_segment_id()?;
        in_flight.building = Some(id);
        Ok(id)
    }

    pub fn building_segment(&self) -> Option<SegmentId> {
        self.in_flight.lock().expect("in-flight lock").building
    }

    pub fn dumping_segments(&self) -> Vec<SegmentId> {
        self.in_flight.lock().expect("in-flight lock").dumping.clone()
    }

    /// Moves the building segment to the dumping list and returns its id.
    pub fn start_dumping(&self) -> Result<SegmentId> {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock");
        let id = in_flight
            .building
            .take()
            .ok_or_else(|| Error::invalid_operation("dump without a building segment"))?;
        in_flight.dumping.push(id);
        Ok(id)
    }

    /// Registers a dumped segment with the realtime sub-directory.
    pub fn finish_dumping(&self, segment_id: SegmentId, info: &SegmentInfo) -> Result<()> {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock");
        let pos = in_flight
            .dumping
            .iter()
            .position(|&id| id == segment_id)
            .ok_or_else(|| {
                Error::invalid_arg("segment_id", format!("segment {segment_id} is not dumping"))
            })?;
        self.realtime.add_segment(segment_id, info)?;
        in_flight.dumping.remove(pos);
        Ok(())
    }

    /// Every segment of the partition in doc id order: committed join segments, then
    /// committed realtime segments, then dumping segments, then the building segment.
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        let mut ids = self.join.working_version().segments;
        ids.extend(self.realtime.working_version().segments);
        let in_flight = self.in_flight.lock().expect("in-flight lock");
        ids.extend(in_flight.dumping.iter().copied());
        ids.extend(in_flight.building);
        ids
    }

    /// Whether the join or the realtime sub-directory has uncommitted changes.
    pub fn is_version_changed(&self) -> bool {
        self.join.is_version_changed() || self.realtime.is_version_changed()
    }

    /// Commits the changed sub-directories. Returns `true` if anything was committed.
    pub fn commit(&self) -> Result<bool> {
        let mut committed = false;
        for dir in [&self.join, &self.realtime] {
            if dir.is_version_changed() {
                dir.commit_version()?;
                committed = true;
            }
        }
        Ok(committed)
    }

    /// Drops realtime segments whose documents are now covered by the join
    /// sub-directory.
    pub fn remove_realtime_segments(&self, segment_ids: &[SegmentId]) -> Result<()> {
        if let Some(id) = segment_ids.iter().find(|&&id| !is_realtime_segment(id)) {
            return Err(Error::invalid_arg(
                "segment_ids",
                format!("segment {id} is not a realtime segment"),
            ));
        }
        self.realtime.remove_segments(segment_ids)
    }

    pub fn collect_garbage(&self) -> Result<Vec<SegmentId>> {
        let mut removed = self.join.collect_garbage()?;
        removed.extend(self.realtime.collect_garbage()?);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use strata_format::layout;
    use strata_io::{MemoryDirectory, join_path};

    use super::*;

    fn make_durable(online: &OnlineSegmentDirectory, dir: &MemoryDirectory, id: SegmentId) {
        let path = join_path(
            &online.directory_of(id).segment_path(id),
            layout::SEGMENT_INFO,
        );
        dir.write_file(&path, &SegmentInfo::new(1).to_json().unwrap())
            .unwrap();
    }

    #[test]
    fn test_realtime_lifecycle() {
        let dir = Arc::new(MemoryDirectory::new());
        let online = OnlineSegmentDirectory::open(dir.clone()).unwrap();
        assert!(!online.is_version_changed());

        let building = online.begin_building().unwrap();
        assert!(is_realtime_segment(building));
        assert!(online.begin_building().is_err());
        assert_eq!(online.segment_ids(), vec![building]);

        assert_eq!(online.start_dumping().unwrap(), building);
        assert_eq!(online.building_segment(), None);
        assert_eq!(online.dumping_segments(), vec![building]);

        let next = online.begin_building().unwrap();
        assert_eq!(next, building + 1);
        assert_eq!(online.segment_ids(), vec![building, next]);

        make_durable(&online, &dir, building);
        online
            .finish_dumping(building, &SegmentInfo::new(1))
            .unwrap();
        assert!(online.is_version_changed());
        assert!(online.realtime().is_version_changed());
        assert!(!online.join().is_version_changed());
        assert!(online.commit().unwrap());
        assert!(!online.is_version_changed());
        assert!(!online.commit().unwrap());
        assert!(dir.exists("rt/version.0"));
        assert!(dir.exists(&format!("rt/segment_{building}")));
    }

    #[test]
    fn test_join_segments_precede_realtime() {
        let dir = Arc::new(MemoryDirectory::new());
        let online = OnlineSegmentDirectory::open(dir.clone()).unwrap();
        let rt = online.begin_building().unwrap();
        online.start_dumping().unwrap();
        make_durable(&online, &dir, rt);
        online.finish_dumping(rt, &SegmentInfo::new(1)).unwrap();

        let joined = online.join().create_new_segment_id().unwrap();
        assert!(!is_realtime_segment(joined));
        make_durable(&online, &dir, joined);
        online
            .join()
            .add_segment(joined, &SegmentInfo::new(1))
            .unwrap();
        online.remove_realtime_segments(&[rt]).unwrap();
        assert!(online.remove_realtime_segments(&[joined]).is_err());
        online.commit().unwrap();
        assert_eq!(online.segment_ids(), vec![joined]);

        let removed = online.collect_garbage().unwrap();
        assert_eq!(removed, vec![rt]);
        assert!(!dir.exists(&format!("rt/segment_{rt}")));

        let reopened = OnlineSegmentDirectory::open(dir).unwrap();
        assert_eq!(reopened.segment_ids(), vec![joined]);
        assert_eq!(reopened.begin_building().unwrap(), rt + 1);
    }

    #[test]
    fn test_finish_unknown_dump_fails() {
        let dir = Arc::new(MemoryDirectory::new());
        let online = OnlineSegmentDirectory::open(dir).unwrap();
        assert!(online.start_dumping().is_err());
        assert!(
            online
                .finish_dumping(REALTIME_SEGMENT_ID_MASK, &SegmentInfo::new(1))
                .is_err()
        );
    }
}
