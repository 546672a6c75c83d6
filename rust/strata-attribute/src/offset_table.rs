//! Per-document offsets into an attribute data blob.
//!
//! A table holds `doc_count + 1` entries; entry `doc_count` is the length of the data.
//! Tables written by a dump or merge are monotonic. Tables that take updates (those of
//! building segments and the extension tables of built ones) point an updated document
//! at a value appended to the end of the data, so their entries are not ordered.
//! Entries are stored either narrow (`u32`) or wide (`u64`). A narrow table is widened
//! by [`OffsetTable::extend`], which builds the wide copy aside and swaps it in under the
//! table's write lock, so readers see either the old or the new table. Widening never
//! goes back.

use std::sync::RwLock;

use strata_budget_tracker::MemoryQuota;
use strata_common::{Result, error::Error, ids::DocId, verify_arg};

use crate::memory::MemoryCharge;

/// Number of entries copied per step while widening a table.
pub const EXTEND_BATCH: usize = 64 * 1024;

#[derive(Debug, Clone)]
enum OffsetSlots {
    Narrow(Vec<u32>),
    Wide(Vec<u64>),
}

impl OffsetSlots {
    fn len(&self) -> usize {
        match self {
            OffsetSlots::Narrow(v) => v.len(),
            OffsetSlots::Wide(v) => v.len(),
        }
    }

    fn width(&self) -> usize {
        match self {
            OffsetSlots::Narrow(_) => 4,
            OffsetSlots::Wide(_) => 8,
        }
    }

    #[inline]
    fn get(&self, idx: usize) -> u64 {
        match self {
            OffsetSlots::Narrow(v) => v[idx] as u64,
            OffsetSlots::Wide(v) => v[idx],
        }
    }
}

pub struct OffsetTable {
    slots: RwLock<OffsetSlots>,
    mutable: bool,
    charge: MemoryCharge,
}

impl OffsetTable {
    /// Creates an empty mutable table for a building segment: a single zero entry.
    pub fn new_building(quota: &MemoryQuota) -> Result<OffsetTable> {
        let table = OffsetTable {
            slots: RwLock::new(OffsetSlots::Narrow(vec![0])),
            mutable: true,
            charge: MemoryCharge::new(quota, "offset table"),
        };
        table.charge.ensure(4)?;
        Ok(table)
    }

    /// Opens a persisted table. The entry width is inferred from the buffer length,
    /// which must be exactly `(doc_count + 1) * 4` or `(doc_count + 1) * 8`.
    pub fn init(
        doc_count: u32,
        buf: &[u8],
        mutable: bool,
        quota: &MemoryQuota,
    ) -> Result<OffsetTable> {
        let entries = doc_count as usize + 1;
        let slots = if buf.len() == entries * 4 {
            OffsetSlots::Narrow(
                buf.chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            )
        } else if buf.len() == entries * 8 {
            OffsetSlots::Wide(
                buf.chunks_exact(8)
                    .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            )
        } else {
            return Err(Error::index_collapsed(
                "offset",
                format!(
                    "length {} does not match {} entries of 4 or 8 bytes",
                    buf.len(),
                    entries
                ),
            ));
        };
        let charge = MemoryCharge::new(quota, "offset table");
        charge.ensure(buf.len() as u64)?;
        Ok(OffsetTable {
            slots: RwLock::new(slots),
            mutable,
            charge,
        })
    }

    /// Builds a table from explicit offsets, narrow when every value fits in 32 bits
    /// unless `wide` is requested.
    pub fn from_offsets(
        offsets: &[u64],
        wide: bool,
        mutable: bool,
        quota: &MemoryQuota,
    ) -> Result<OffsetTable> {
        verify_arg!(offsets, !offsets.is_empty());
        let fits = offsets.iter().all(|&o| o <= u32::MAX as u64);
        let slots = if wide || !fits {
            OffsetSlots::Wide(offsets.to_vec())
        } else {
            OffsetSlots::Narrow(offsets.iter().map(|&o| o as u32).collect())
        };
        let charge = MemoryCharge::new(quota, "offset table");
        charge.ensure((slots.len() * slots.width()) as u64)?;
        Ok(OffsetTable {
            slots: RwLock::new(slots),
            mutable,
            charge,
        })
    }

    pub fn doc_count(&self) -> u32 {
        (self.read_slots().len() - 1) as u32
    }

    pub fn width(&self) -> usize {
        self.read_slots().width()
    }

    pub fn is_wide(&self) -> bool {
        self.width() == 8
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Offset of `doc_id`; `doc_id == doc_count` yields the end of the data.
    pub fn get_offset(&self, doc_id: DocId) -> Result<u64> {
        let slots = self.read_slots();
        verify_arg!(doc_id, (doc_id as usize) < slots.len());
        Ok(slots.get(doc_id as usize))
    }

    /// `[start, end)` byte range of a document, taken from two consecutive entries.
    /// Fails for a document whose entry was redirected by an update.
    pub fn range(&self, doc_id: DocId) -> Result<(u64, u64)> {
        let slots = self.read_slots();
        verify_arg!(doc_id, (doc_id as usize) + 1 < slots.len());
        let (start, end) = (slots.get(doc_id as usize), slots.get(doc_id as usize + 1));
        if start > end {
            return Err(Error::invalid_operation(format!(
                "range of doc {doc_id}, whose offset {start} is past the next entry {end}"
            )));
        }
        Ok((start, end))
    }

    /// Sets an entry, widening the table first when the value does not fit 32 bits.
    pub fn set_offset(&self, doc_id: DocId, value: u64) -> Result<()> {
        if !self.mutable {
            return Err(Error::invalid_operation("set_offset on a read-only offset table"));
        }
        verify_arg!(doc_id, doc_id <= self.doc_count());
        if value > u32::MAX as u64 && !self.is_wide() {
            self.extend()?;
        }
        let mut slots = self.write_slots();
        match &mut *slots {
            OffsetSlots::Narrow(v) => v[doc_id as usize] = value as u32,
            OffsetSlots::Wide(v) => v[doc_id as usize] = value,
        }
        Ok(())
    }

    /// Appends an entry, growing `doc_count` by one.
    pub fn push(&self, value: u64) -> Result<()> {
        if !self.mutable {
            return Err(Error::invalid_operation("push on a read-only offset table"));
        }
        if value > u32::MAX as u64 && !self.is_wide() {
            self.extend()?;
        }
        let (len, width) = {
            let slots = self.read_slots();
            (slots.len() + 1, slots.width())
        };
        self.charge.ensure((len * width) as u64)?;
        let mut slots = self.write_slots();
        match &mut *slots {
            OffsetSlots::Narrow(v) => v.push(value as u32),
            OffsetSlots::Wide(v) => v.push(value),
        }
        Ok(())
    }

    /// Widens a narrow table to 64-bit entries. Returns `false` if it already was wide.
    ///
    /// The wide copy is reserved against the memory quota up front; when the quota
    /// refuses, the table is left unchanged and `ResourceExhausted` is returned.
    pub fn extend(&self) -> Result<bool> {
        let wide = {
            let slots = self.read_slots();
            let OffsetSlots::Narrow(narrow) = &*slots else {
                return Ok(false);
            };
            self.charge.reserve((narrow.len() * 8) as u64)?;
            let mut wide = Vec::with_capacity(narrow.len());
            for batch in narrow.chunks(EXTEND_BATCH) {
                wide.extend(batch.iter().map(|&o| o as u64));
            }
            wide
        };
        let new_bytes = (wide.len() * 8) as u64;
        *self.write_slots() = OffsetSlots::Wide(wide);
        self.charge.release_to(new_bytes);
        log::debug!(
            "offset table extended to 64-bit, {} entries",
            new_bytes / 8
        );
        Ok(true)
    }

    /// Returns the entries as a vector of 64-bit values.
    pub fn to_vec(&self) -> Vec<u64> {
        let slots = self.read_slots();
        (0..slots.len()).map(|i| slots.get(i)).collect()
    }

    /// Serializes the table in its current width.
    pub fn to_bytes(&self) -> Vec<u8> {
        let slots = self.read_slots();
        let mut out = Vec::with_capacity(slots.len() * slots.width());
        match &*slots {
            OffsetSlots::Narrow(v) => v.iter().for_each(|o| out.extend_from_slice(&o.to_le_bytes())),
            OffsetSlots::Wide(v) => v.iter().for_each(|o| out.extend_from_slice(&o.to_le_bytes())),
        }
        out
    }

    /// Copies the table into a new mutable one of the same width.
    pub fn clone_mutable(&self, quota: &MemoryQuota) -> Result<OffsetTable> {
        let slots = self.read_slots().clone();
        let charge = MemoryCharge::new(quota, "offset table");
        charge.ensure((slots.len() * slots.width()) as u64)?;
        Ok(OffsetTable {
            slots: RwLock::new(slots),
            mutable: true,
            charge,
        })
    }

    pub fn memory_usage(&self) -> u64 {
        self.charge.charged()
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, OffsetSlots> {
        self.slots.read().expect("offset table lock")
    }

    fn write_slots(&self) -> std::sync::RwLockWriteGuard<'_, OffsetSlots> {
        self.slots.write().expect("offset table lock")
    }
}

impl std::fmt::Debug for OffsetTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetTable")
            .field("doc_count", &self.doc_count())
            .field("width", &self.width())
            .field("mutable", &self.mutable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strata_common::error::ErrorKind;

    use super::*;

    fn narrow_bytes(offsets: &[u32]) -> Vec<u8> {
        offsets.iter().flat_map(|o| o.to_le_bytes()).collect()
    }

    #[test]
    fn test_init_infers_width() {
        let quota = MemoryQuota::unlimited();
        let narrow = OffsetTable::init(2, &narrow_bytes(&[0, 3, 5]), false, &quota).unwrap();
        assert_eq!(narrow.width(), 4);
        assert_eq!(narrow.range(1).unwrap(), (3, 5));

        let wide_bytes = [0u64, 3, 5]
            .iter()
            .flat_map(|o| o.to_le_bytes())
            .collect::<Vec<_>>();
        let wide = OffsetTable::init(2, &wide_bytes, false, &quota).unwrap();
        assert_eq!(wide.width(), 8);
        assert_eq!(wide.get_offset(2).unwrap(), 5);
    }

    #[test]
    fn test_init_rejects_inconsistent_length() {
        let quota = MemoryQuota::unlimited();
        let err = OffsetTable::init(3, &narrow_bytes(&[0, 3, 5]), false, &quota).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::IndexCollapsed { .. }));
        assert!(OffsetTable::init(0, &[0; 5], false, &quota).is_err());
        assert!(OffsetTable::init(0, &[0; 4], false, &quota).is_ok());
    }

    #[test]
    fn test_wide_table_set_offsets() {
        let quota = MemoryQuota::unlimited();
        let table =
            OffsetTable::from_offsets(&[0, 3, 5, 7, 9, 10, 12], true, true, &quota).unwrap();
        assert_eq!(table.doc_count(), 6);
        assert_eq!(table.get_offset(3).unwrap(), 7);
        table.set_offset(2, 1000 + 5).unwrap();
        table.set_offset(4, 1000 + 11).unwrap();
        assert_eq!(table.get_offset(2).unwrap(), 1005);
        assert_eq!(table.get_offset(4).unwrap(), 1011);
        assert_eq!(table.get_offset(3).unwrap(), 7);
    }

    #[test]
    fn test_range_of_redirected_doc_fails() {
        let quota = MemoryQuota::unlimited();
        let table = OffsetTable::from_offsets(&[0, 3, 5, 7], false, true, &quota).unwrap();
        // Doc 0 now points at a value appended after the end of the data.
        table.set_offset(0, 7).unwrap();
        table.set_offset(3, 9).unwrap();
        assert_eq!(table.get_offset(0).unwrap(), 7);
        assert!(table.range(0).is_err());
        assert_eq!(table.range(1).unwrap(), (3, 5));
    }

    #[test]
    fn test_read_only_table_refuses_writes() {
        let quota = MemoryQuota::unlimited();
        let table = OffsetTable::init(1, &narrow_bytes(&[0, 4]), false, &quota).unwrap();
        let err = table.set_offset(0, 1).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidOperation { .. }));
        assert!(table.push(8).is_err());
        assert!(table.get_offset(2).is_err());
    }

    #[test]
    fn test_set_large_value_extends() {
        let quota = MemoryQuota::unlimited();
        let offsets = (0..200_000u64).map(|i| i * 3).collect::<Vec<_>>();
        let table = OffsetTable::from_offsets(&offsets, false, true, &quota).unwrap();
        assert_eq!(table.width(), 4);
        let before = table.to_vec();

        let big = u32::MAX as u64 + 10;
        table.set_offset(7, big).unwrap();
        assert!(table.is_wide());
        assert_eq!(table.get_offset(7).unwrap(), big);
        for (i, &v) in before.iter().enumerate() {
            if i != 7 {
                assert_eq!(table.get_offset(i as u32).unwrap(), v);
            }
        }
        assert!(!table.extend().unwrap());
        assert_eq!(table.to_bytes().len(), offsets.len() * 8);
    }

    #[test]
    fn test_extend_preserves_values() {
        let quota = MemoryQuota::unlimited();
        let offsets = (0..1000u64).map(|i| i * i).collect::<Vec<_>>();
        let table = OffsetTable::from_offsets(&offsets, false, false, &quota).unwrap();
        assert!(table.extend().unwrap());
        assert_eq!(table.to_vec(), offsets);
        for i in 0..999 {
            assert!(table.get_offset(i).unwrap() <= table.get_offset(i + 1).unwrap());
        }
    }

    #[test]
    fn test_extend_refused_by_quota() {
        let offsets = (0..10_000u64).collect::<Vec<_>>();
        let quota = MemoryQuota::new(64 * 1024);
        let table = OffsetTable::from_offsets(&offsets, false, true, &quota).unwrap();
        let err = table.extend().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(table.width(), 4);
        assert_eq!(table.to_vec(), offsets);
    }

    #[test]
    fn test_building_table_push() {
        let quota = MemoryQuota::unlimited();
        let table = OffsetTable::new_building(&quota).unwrap();
        assert_eq!(table.doc_count(), 0);
        table.push(10).unwrap();
        table.push(10).unwrap();
        table.push(u32::MAX as u64 + 1).unwrap();
        assert_eq!(table.doc_count(), 3);
        assert!(table.is_wide());
        assert_eq!(table.range(2).unwrap(), (10, u32::MAX as u64 + 1));
    }

    #[test]
    fn test_readers_never_see_partial_extend() {
        let quota = MemoryQuota::unlimited();
        let offsets = (0..300_000u64).map(|i| i * 2).collect::<Vec<_>>();
        let table = Arc::new(OffsetTable::from_offsets(&offsets, false, true, &quota).unwrap());
        let reader = {
            let table = table.clone();
            std::thread::spawn(move || {
                for round in 0..200u32 {
                    let doc = (round * 1499) % 300_000;
                    assert_eq!(table.get_offset(doc).unwrap(), doc as u64 * 2);
                }
            })
        };
        table.extend().unwrap();
        reader.join().unwrap();
        assert!(table.is_wide());
    }
}
