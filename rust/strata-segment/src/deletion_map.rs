//! Per-segment tombstones.
//!
//! A deletion map is a bit array over the local doc ids of one segment: bit `i` is set
//! when document `i` has been logically removed. Bits are stored LSB-first in `u64`
//! words, and bits past the doc count in the final word are always zero.
//!
//! # Persisted format
//!
//! ```text
//! [doc_count: u32][deleted_count: u32][words: u64 * ceil(doc_count / 64)][checksum: u32]
//! ```
//!
//! All integers are little-endian.

use std::sync::{
    RwLock,
    atomic::{AtomicBool, Ordering},
};

use strata_common::{Result, error::Error, ids::DocId, verify_arg, verify_data};
use strata_format::{checksum, layout};
use strata_io::{Directory, join_path};

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Default)]
struct Bits {
    doc_count: u32,
    deleted: u32,
    words: Vec<u64>,
}

impl Bits {
    fn get(&self, doc_id: DocId) -> bool {
        if doc_id >= self.doc_count {
            return false;
        }
        let (word, bit) = (doc_id as usize / 64, doc_id % 64);
        self.words[word] & (1u64 << bit) != 0
    }
}

#[derive(Debug, Default)]
pub struct DeletionMap {
    bits: RwLock<Bits>,
    dirty: AtomicBool,
}

impl DeletionMap {
    /// Creates a map over `doc_count` documents with none deleted.
    pub fn new(doc_count: u32) -> DeletionMap {
        DeletionMap {
            bits: RwLock::new(Bits {
                doc_count,
                deleted: 0,
                words: vec![0; (doc_count as usize).div_ceil(64)],
            }),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn doc_count(&self) -> u32 {
        self.bits.read().expect("deletion map lock").doc_count
    }

    pub fn deleted_count(&self) -> u32 {
        self.bits.read().expect("deletion map lock").deleted
    }

    pub fn live_count(&self) -> u32 {
        let bits = self.bits.read().expect("deletion map lock");
        bits.doc_count - bits.deleted
    }

    /// Returns `true` if `doc_id` has been deleted. Ids past the doc count are live.
    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.bits.read().expect("deletion map lock").get(doc_id)
    }

    /// Grows the covered doc range of a building segment. Shrinking is not allowed.
    pub fn grow(&self, doc_count: u32) -> Result<()> {
        let mut bits = self.bits.write().expect("deletion map lock");
        verify_arg!(doc_count, doc_count >= bits.doc_count);
        bits.doc_count = doc_count;
        bits.words.resize((doc_count as usize).div_ceil(64), 0);
        Ok(())
    }

    /// Marks `doc_id` deleted. Returns `false` if it already was.
    pub fn delete(&self, doc_id: DocId) -> Result<bool> {
        let mut bits = self.bits.write().expect("deletion map lock");
        verify_arg!(doc_id, doc_id < bits.doc_count);
        let (word, mask) = (doc_id as usize / 64, 1u64 << (doc_id % 64));
        if bits.words[word] & mask != 0 {
            return Ok(false);
        }
        bits.words[word] |= mask;
        bits.deleted += 1;
        drop(bits);
        self.dirty.store(true, Ordering::Release);
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Deleted doc ids in ascending order.
    pub fn deleted_docs(&self) -> Vec<DocId> {
        let bits = self.bits.read().expect("deletion map lock");
        let mut docs = Vec::with_capacity(bits.deleted as usize);
        for (i, &word) in bits.words.iter().enumerate() {
            let mut w = word;
            while w != 0 {
                let bit = w.trailing_zeros();
                docs.push(i as u32 * 64 + bit);
                w &= w - 1;
            }
        }
        docs
    }

    /// A point-in-time copy, detached from further deletions.
    pub fn snapshot(&self) -> DeletionMap {
        DeletionMap {
            bits: RwLock::new(self.bits.read().expect("deletion map lock").clone()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let bits = self.bits.read().expect("deletion map lock");
        let mut out =
            Vec::with_capacity(HEADER_LEN + bits.words.len() * 8 + checksum::CHECKSUM_SIZE);
        out.extend_from_slice(&bits.doc_count.to_le_bytes());
        out.extend_from_slice(&bits.deleted.to_le_bytes());
        for word in &bits.words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        checksum::append_checksum(&mut out);
        out
    }

    /// Parses a persisted map, which must cover exactly `doc_count` documents.
    pub fn from_bytes(buf: &[u8], doc_count: u32) -> Result<DeletionMap> {
        let body = checksum::strip_checksum(buf, layout::DELETION_MAP_FILE)?;
        verify_data!(deletionmap, body.len() >= HEADER_LEN);
        let stored_count = u32::from_le_bytes(body[0..4].try_into().expect("4 bytes"));
        if stored_count != doc_count {
            return Err(Error::index_collapsed(
                layout::DELETION_MAP_FILE,
                format!("doc count {stored_count} != segment doc count {doc_count}"),
            ));
        }
        let deleted = u32::from_le_bytes(body[4..8].try_into().expect("4 bytes"));
        let word_count = (doc_count as usize).div_ceil(64);
        verify_data!(deletionmap, body.len() == HEADER_LEN + word_count * 8);

        let words = body[HEADER_LEN..]
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().expect("8 bytes")))
            .collect::<Vec<_>>();
        let tail_bits = doc_count % 64;
        if tail_bits != 0 {
            verify_data!(deletionmap, words[word_count - 1] >> tail_bits == 0);
        }
        let popcount = words.iter().map(|w| w.count_ones()).sum::<u32>();
        verify_data!(deletionmap, popcount == deleted);

        Ok(DeletionMap {
            bits: RwLock::new(Bits {
                doc_count,
                deleted,
                words,
            }),
            dirty: AtomicBool::new(false),
        })
    }

    /// Loads `deletionmap` under `segment_path`; a segment without one has no deletions.
    pub fn load(dir: &dyn Directory, segment_path: &str, doc_count: u32) -> Result<DeletionMap> {
        let path = join_path(segment_path, layout::DELETION_MAP_FILE);
        if !dir.exists(&path) {
            return Ok(DeletionMap::new(doc_count));
        }
        let buf = dir.read_file(&path).map_err(|e| Error::io(&path, e))?;
        DeletionMap::from_bytes(&buf, doc_count)
    }

    /// Writes the map under `segment_path` and clears the dirty flag.
    pub fn store(&self, dir: &dyn Directory, segment_path: &str) -> Result<()> {
        let path = join_path(segment_path, layout::DELETION_MAP_FILE);
        dir.write_file(&path, &self.to_bytes())
            .map_err(|e| Error::io(&path, e))?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use strata_common::error::ErrorKind;
    use strata_io::MemoryDirectory;

    use super::*;

    #[test]
    fn test_delete_and_query() {
        let map = DeletionMap::new(130);
        assert!(!map.is_dirty());
        assert!(map.delete(0).unwrap());
        assert!(map.delete(64).unwrap());
        assert!(map.delete(129).unwrap());
        assert!(!map.delete(64).unwrap());
        assert_eq!(map.deleted_count(), 3);
        assert_eq!(map.live_count(), 127);
        assert!(map.is_deleted(129));
        assert!(!map.is_deleted(1));
        assert!(!map.is_deleted(5000));
        assert_eq!(map.deleted_docs(), vec![0, 64, 129]);
        assert!(map.is_dirty());
        assert!(map.delete(130).is_err());
    }

    #[test]
    fn test_grow() {
        let map = DeletionMap::new(0);
        map.grow(10).unwrap();
        map.delete(9).unwrap();
        map.grow(100).unwrap();
        map.delete(99).unwrap();
        assert_eq!(map.deleted_docs(), vec![9, 99]);
        assert!(map.grow(50).is_err());
    }

    #[test]
    fn test_store_and_load() {
        let dir = MemoryDirectory::new();
        let map = DeletionMap::new(70);
        map.delete(3).unwrap();
        map.delete(69).unwrap();
        map.store(&dir, "segment_0").unwrap();
        assert!(!map.is_dirty());

        let loaded = DeletionMap::load(&dir, "segment_0", 70).unwrap();
        assert_eq!(loaded.deleted_docs(), vec![3, 69]);

        let missing = DeletionMap::load(&dir, "segment_1", 5).unwrap();
        assert_eq!(missing.deleted_count(), 0);
    }

    #[test]
    fn test_load_rejects_doc_count_mismatch() {
        let map = DeletionMap::new(10);
        let err = DeletionMap::from_bytes(&map.to_bytes(), 11).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::IndexCollapsed { .. }));
    }

    #[test]
    fn test_load_rejects_bad_checksum() {
        let map = DeletionMap::new(10);
        map.delete(2).unwrap();
        let mut buf = map.to_bytes();
        buf[8] ^= 0xFF;
        let err = DeletionMap::from_bytes(&buf, 10).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let map = DeletionMap::new(4);
        map.delete(1).unwrap();
        let snapshot = map.snapshot();
        map.delete(2).unwrap();
        assert_eq!(snapshot.deleted_docs(), vec![1]);
        assert_eq!(map.deleted_docs(), vec![1, 2]);
    }
}
