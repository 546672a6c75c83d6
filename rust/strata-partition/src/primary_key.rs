//! Primary key lookup for the live documents of a partition.

use strata_common::{
    Result,
    error::Error,
    ids::{DocId, SegmentId},
};
use strata_document::PrimaryKey;
use strata_segment::SegmentData;

/// Location of a document: its segment and its local doc id there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocAddress {
    pub segment_id: SegmentId,
    pub doc_id: DocId,
}

impl DocAddress {
    pub fn new(segment_id: SegmentId, doc_id: DocId) -> DocAddress {
        DocAddress { segment_id, doc_id }
    }
}

/// Maps every live primary key to the document that holds it.
///
/// The index is rebuilt from the primary key attribute when a partition is opened and
/// after merges renumber documents; in between it follows the adds and deletes
/// applied by the partition modifier.
///
/// Entries live in a persistent map: a clone shares all unchanged entries, so
/// reader snapshots cost O(1) and later writes copy only the paths they touch.
#[derive(Debug, Clone, Default)]
pub struct PrimaryKeyIndex {
    entries: im::HashMap<PrimaryKey, DocAddress, ahash::RandomState>,
}

impl PrimaryKeyIndex {
    pub fn new() -> PrimaryKeyIndex {
        Default::default()
    }

    /// Builds the index from the `field` attribute of `segments`, given in doc id
    /// order. Deleted documents are skipped; a key present in several segments
    /// resolves to its last occurrence.
    pub fn build<'a>(
        field: &str,
        segments: impl IntoIterator<Item = &'a SegmentData>,
    ) -> Result<PrimaryKeyIndex> {
        let mut index = PrimaryKeyIndex::new();
        for segment in segments {
            index.load_segment(field, segment)?;
        }
        Ok(index)
    }

    /// Adds the live documents of one segment. Returns the number of keys loaded.
    pub fn load_segment(&mut self, field: &str, segment: &SegmentData) -> Result<usize> {
        let segment_id = segment.segment_id();
        let store = segment.attribute_by_name(field).ok_or_else(|| {
            Error::schema_violation(field, "primary key attribute is missing")
                .in_segment(segment_id, None)
        })?;
        let mut loaded = 0;
        for doc_id in 0..segment.doc_count() {
            if segment.is_deleted(doc_id) {
                continue;
            }
            let value = store
                .read_value(doc_id)
                .map_err(|e| e.in_segment(segment_id, Some(field)))?;
            let key = PrimaryKey::from_value(&value).ok_or_else(|| {
                Error::corrupt_data(field, format!("doc {doc_id} holds no usable primary key"))
                    .in_segment(segment_id, Some(field))
            })?;
            self.entries.insert(key, DocAddress::new(segment_id, doc_id));
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn get(&self, key: &PrimaryKey) -> Option<DocAddress> {
        self.entries.get(key).copied()
    }

    /// Points `key` at `address`, returning the address it replaced.
    pub fn insert(&mut self, key: PrimaryKey, address: DocAddress) -> Option<DocAddress> {
        self.entries.insert(key, address)
    }

    pub fn remove(&mut self, key: &PrimaryKey) -> Option<DocAddress> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PrimaryKey, &DocAddress)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use strata_attribute::{AttrValue, AttributeConfig};
    use strata_budget_tracker::MemoryQuota;
    use strata_format::{FieldConfig, FieldType, Schema};

    use super::*;

    fn segment(id: SegmentId, keys: &[u64]) -> SegmentData {
        let schema = Schema {
            fields: vec![FieldConfig::new(0, "pk", FieldType::UInt64)],
            primary_key: Some("pk".into()),
            ..Default::default()
        };
        let configs = AttributeConfig::from_schema(&schema).unwrap();
        let segment = SegmentData::create_building(
            id,
            format!("segment_{id}"),
            &configs,
            0,
            &MemoryQuota::unlimited(),
        )
        .unwrap();
        let codec = configs[0].codec().unwrap();
        for &key in keys {
            segment
                .add_document(&[codec.encode(&AttrValue::from(key)).unwrap()])
                .unwrap();
        }
        segment
    }

    #[test]
    fn test_build_skips_deleted_and_keeps_last() {
        let first = segment(0, &[1, 2, 3]);
        let second = segment(1, &[3, 4]);
        first.delete_document(1).unwrap();

        let index = PrimaryKeyIndex::build("pk", [&first, &second]).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.get(&PrimaryKey::from(1i64)), Some(DocAddress::new(0, 0)));
        assert_eq!(index.get(&PrimaryKey::from(2i64)), None);
        assert_eq!(index.get(&PrimaryKey::from(3i64)), Some(DocAddress::new(1, 0)));
        assert_eq!(index.get(&PrimaryKey::from(4i64)), Some(DocAddress::new(1, 1)));
    }

    #[test]
    fn test_clone_is_a_snapshot() {
        let mut index = PrimaryKeyIndex::build("pk", [&segment(0, &[1, 2])]).unwrap();
        let snapshot = index.clone();
        index.insert(PrimaryKey::from(3i64), DocAddress::new(1, 0));
        index.remove(&PrimaryKey::from(1i64));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(&PrimaryKey::from(1i64)), Some(DocAddress::new(0, 0)));
        assert_eq!(snapshot.get(&PrimaryKey::from(3i64)), None);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_missing_key_attribute() {
        let seg = segment(0, &[1]);
        let err = PrimaryKeyIndex::build("other", [&seg]).unwrap_err();
        assert!(matches!(
            err.root_kind(),
            strata_common::error::ErrorKind::SchemaViolation { .. }
        ));
    }
}
