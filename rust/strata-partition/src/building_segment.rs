use std::sync::Arc;

use strata_budget_tracker::MemoryQuota;
use strata_common::{Result, ids::DocId};
use strata_document::Document;
use strata_segment::{SegmentData, SegmentDirectory};

use crate::encoder::DocumentEncoder;

/// The in-memory segment receiving the added documents of a partition.
#[derive(Debug)]
pub struct BuildingSegment {
    segment: Arc<SegmentData>,
    encoder: Arc<DocumentEncoder>,
}

impl BuildingSegment {
    /// Allocates a segment id in `directory` and creates an empty building segment for
    /// it.
    pub fn create(
        directory: &SegmentDirectory,
        encoder: Arc<DocumentEncoder>,
        schema_version_id: u32,
        quota: &MemoryQuota,
    ) -> Result<BuildingSegment> {
        let segment_id = directory.create_new_segment_id()?;
        let segment = SegmentData::create_building(
            segment_id,
            directory.segment_path(segment_id),
            encoder.attributes(),
            schema_version_id,
            quota,
        )?;
        log::debug!("building segment {segment_id} created");
        Ok(BuildingSegment {
            segment: Arc::new(segment),
            encoder,
        })
    }

    pub fn segment(&self) -> &Arc<SegmentData> {
        &self.segment
    }

    pub fn doc_count(&self) -> u32 {
        self.segment.doc_count()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count() == 0
    }

    /// Appends a document and advances the segment's locator to the document's.
    pub fn add_document(&self, document: &Document) -> Result<DocId> {
        let values = self.encoder.encode(document)?;
        let doc_id = self.segment.add_document(&values)?;
        self.segment
            .set_locator(document.locator(), document.timestamp());
        Ok(doc_id)
    }
}

#[cfg(test)]
mod tests {
    use strata_attribute::AttrValue;
    use strata_format::Locator;
    use strata_io::MemoryDirectory;
    use strata_testkit::sample_schema;

    use super::*;

    #[test]
    fn test_add_documents() {
        let dir = Arc::new(MemoryDirectory::new());
        let directory = SegmentDirectory::open(dir, "").unwrap();
        let encoder = Arc::new(DocumentEncoder::new(&sample_schema()).unwrap());
        let building =
            BuildingSegment::create(&directory, encoder.clone(), 1, &MemoryQuota::unlimited())
                .unwrap();
        assert!(building.is_empty());

        let first = Document::add()
            .with_field("id", "a")
            .with_locator(Locator::new(1, 7), 70);
        let second = Document::add()
            .with_field("id", "b")
            .with_field("title", "hello")
            .with_locator(Locator::new(1, 5), 50);
        assert_eq!(building.add_document(&first).unwrap(), 0);
        assert_eq!(building.add_document(&second).unwrap(), 1);

        let info = building.segment().info();
        assert_eq!(info.doc_count, 2);
        assert_eq!(info.locator, Locator::new(1, 7));
        assert_eq!(info.timestamp, 70);
        assert_eq!(
            encoder.read_field(building.segment(), 1, "title").unwrap(),
            AttrValue::from("hello")
        );

        let bad = Document::add().with_field("id", "c").with_field("price", "cheap");
        assert!(building.add_document(&bad).is_err());
        assert_eq!(building.doc_count(), 2);
    }
}
