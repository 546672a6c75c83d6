//! Shared fixtures for strata tests: a sample schema, temporary partition
//! directories and seeded document generators.

use std::{path::Path, sync::Arc};

use strata_attribute::AttrValue;
use strata_document::{Document, DocumentBatch};
use strata_format::{FieldConfig, FieldType, Locator, PackConfig, Schema};
use strata_io::{Directory, FsDirectory};

/// Schema exercising every attribute shape:
///
/// | field   | type            | notes                     |
/// |---------|-----------------|---------------------------|
/// | `id`    | string          | primary key               |
/// | `price` | int64           | updatable                 |
/// | `title` | string          | updatable, nullable       |
/// | `tags`  | multi string    | updatable                 |
/// | `ts`    | int64           |                           |
/// | `flag`  | uint8           | updatable, packed in `meta` |
/// | `rank`  | int32           | packed in `meta`          |
pub fn sample_schema() -> Schema {
    Schema {
        schema_version_id: 1,
        fields: vec![
            FieldConfig::new(0, "id", FieldType::String),
            FieldConfig::new(1, "price", FieldType::Int64).updatable(),
            FieldConfig::new(2, "title", FieldType::String)
                .updatable()
                .nullable(),
            FieldConfig::new(3, "tags", FieldType::String)
                .multi_value()
                .updatable(),
            FieldConfig::new(4, "ts", FieldType::Int64),
            FieldConfig::new(5, "flag", FieldType::UInt8).updatable(),
            FieldConfig::new(6, "rank", FieldType::Int32),
        ],
        packs: vec![PackConfig {
            id: 10,
            name: "meta".into(),
            sub_fields: vec!["flag".into(), "rank".into()],
        }],
        primary_key: Some("id".into()),
        ..Default::default()
    }
}

/// A temporary directory holding one partition, removed on drop.
pub struct TestDir {
    dir: tempfile::TempDir,
}

impl TestDir {
    pub fn new() -> anyhow::Result<TestDir> {
        Ok(TestDir {
            dir: tempfile::Builder::new().prefix("strata-").tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh file-system [`Directory`] rooted at the temporary directory.
    pub fn directory(&self) -> anyhow::Result<Arc<dyn Directory>> {
        Ok(Arc::new(FsDirectory::new(self.dir.path())?))
    }
}

/// Seeded generator of documents for [`sample_schema`].
///
/// Keys are `k0`, `k1`, ... in order of generation; every generated add advances the
/// locator offset by one.
pub struct DocGenerator {
    rng: fastrand::Rng,
    next_key: u64,
    offset: i64,
}

impl DocGenerator {
    pub fn new(seed: u64) -> DocGenerator {
        DocGenerator {
            rng: fastrand::Rng::with_seed(seed),
            next_key: 0,
            offset: 0,
        }
    }

    pub fn key(n: u64) -> String {
        format!("k{n}")
    }

    /// Number of distinct keys generated so far.
    pub fn key_count(&self) -> u64 {
        self.next_key
    }

    /// An add for a new key, with every field populated.
    pub fn add(&mut self) -> Document {
        let key = Self::key(self.next_key);
        self.next_key += 1;
        self.add_for(&key)
    }

    /// An add for `key`, with every field populated.
    pub fn add_for(&mut self, key: &str) -> Document {
        let tag_count = self.rng.usize(0..4);
        let tags = (0..tag_count)
            .map(|_| self.word(1..6))
            .collect::<Vec<_>>();
        let title = self.word(0..24);
        let locator = self.next_locator();
        Document::add()
            .with_field("id", key)
            .with_field("price", self.rng.i64(-1_000..1_000_000))
            .with_field("title", title)
            .with_field("tags", AttrValue::strings(tags))
            .with_field("ts", self.rng.i64(0..1_000_000))
            .with_field("flag", self.rng.u8(..))
            .with_field("rank", self.rng.i32(..))
            .with_locator(locator, locator.offset)
    }

    /// An update of one random updatable field of `key`.
    pub fn update(&mut self, key: &str) -> Document {
        let doc = Document::update().with_field("id", key);
        let locator = self.next_locator();
        let doc = match self.rng.u8(0..4) {
            0 => doc.with_field("price", self.rng.i64(-1_000..1_000_000)),
            1 => doc.with_field("title", self.word(0..40)),
            2 => doc.with_field("flag", self.rng.u8(..)),
            _ => doc.with_field(
                "tags",
                AttrValue::strings((0..self.rng.usize(0..3)).map(|_| self.word(1..4)).collect::<Vec<_>>()),
            ),
        };
        doc.with_locator(locator, locator.offset)
    }

    /// A key generated earlier; `None` before the first add.
    pub fn existing_key(&mut self) -> Option<String> {
        (self.next_key > 0).then(|| Self::key(self.rng.u64(0..self.next_key)))
    }

    /// A batch mixing new adds with updates and deletes of earlier keys.
    ///
    /// `update_percent` and `delete_percent` are the odds, out of 100, of an update or a
    /// delete instead of an add.
    pub fn batch(&mut self, len: usize, update_percent: u8, delete_percent: u8) -> DocumentBatch {
        let mut batch = DocumentBatch::new();
        for _ in 0..len {
            let roll = self.rng.u8(0..100);
            let doc = match self.existing_key() {
                Some(key) if roll < update_percent => self.update(&key),
                Some(key) if roll < update_percent.saturating_add(delete_percent) => {
                    Document::delete().with_field("id", key)
                }
                _ => self.add(),
            };
            batch.push(doc);
        }
        batch
    }

    fn next_locator(&mut self) -> Locator {
        self.offset += 1;
        Locator::new(0, self.offset)
    }

    fn word(&mut self, len: std::ops::Range<usize>) -> String {
        let len = self.rng.usize(len);
        (0..len).map(|_| self.rng.lowercase()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_schema_is_valid() {
        sample_schema().validate().unwrap();
    }

    #[test]
    fn test_generator_is_deterministic() {
        let a = DocGenerator::new(3).batch(20, 30, 10);
        let b = DocGenerator::new(3).batch(20, 30, 10);
        assert_eq!(a.documents(), b.documents());
        assert_eq!(
            a.documents()[0].primary_key(&sample_schema()),
            Some("k0".into())
        );
    }

    #[test]
    fn test_dir_is_writable() {
        let dir = TestDir::new().unwrap();
        let directory = dir.directory().unwrap();
        directory.write_file("a", b"x").unwrap();
        assert!(dir.path().join("a").exists());
    }
}
