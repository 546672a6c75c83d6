//! Append-only log of attribute updates made after a segment was built.
//!
//! A log moves through `Empty -> Collecting -> Sealed -> Replayed -> Discarded`. All
//! appended records are retained in observation order; when several records target the
//! same `(doc, attribute)` pair, only the last one survives replay.
//!
//! Dumped patch files are laid out as:
//!
//! ```text
//! magic "SPAT" | version: u16 | reserved: u16 | record_count: u32
//! record_count x (doc_id: u32 | attr_id: u16 | flags: u8 | len: u32 | bytes[len])
//! checksum: u32
//! ```
//!
//! All integers are little-endian.

use ahash::AHashMap;
use strata_common::{
    Result,
    error::Error,
    ids::{AttrId, DocId},
    try_or_ret_some_err, verify_data,
};
use strata_format::checksum;

pub const PATCH_MAGIC: [u8; 4] = *b"SPAT";
pub const PATCH_FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 12;
const RECORD_HEADER_LEN: usize = 11;
const FLAG_NULL: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub doc_id: DocId,
    pub attr_id: AttrId,
    pub value: Vec<u8>,
    pub is_null: bool,
    /// Generation of the log the record was loaded from.
    pub generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchLogState {
    Empty,
    Collecting,
    Sealed,
    Replayed,
    Discarded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: usize,
    pub superseded: usize,
    pub skipped_deleted: usize,
}

#[derive(Debug, Clone)]
pub struct PatchLog {
    generation: u32,
    state: PatchLogState,
    records: Vec<PatchRecord>,
}

impl PatchLog {
    pub fn new(generation: u32) -> PatchLog {
        PatchLog {
            generation,
            state: PatchLogState::Empty,
            records: Vec::new(),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn state(&self) -> PatchLogState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn append(
        &mut self,
        doc_id: DocId,
        attr_id: AttrId,
        value: &[u8],
        is_null: bool,
    ) -> Result<()> {
        match self.state {
            PatchLogState::Empty | PatchLogState::Collecting => {}
            state => {
                return Err(Error::invalid_operation(format!(
                    "append to a patch log in state {state:?}"
                )));
            }
        }
        if value.len() > u32::MAX as usize {
            return Err(Error::invalid_arg("value", "patch value too long"));
        }
        self.records.push(PatchRecord {
            doc_id,
            attr_id,
            value: value.to_vec(),
            is_null,
            generation: self.generation,
        });
        self.state = PatchLogState::Collecting;
        Ok(())
    }

    /// Removes the most recent record of a collecting log.
    pub fn pop(&mut self) -> Option<PatchRecord> {
        if self.state != PatchLogState::Collecting {
            return None;
        }
        let record = self.records.pop();
        if self.records.is_empty() {
            self.state = PatchLogState::Empty;
        }
        record
    }

    /// Stops collecting. Sealing an already sealed log is a no-op.
    pub fn seal(&mut self) -> Result<()> {
        match self.state {
            PatchLogState::Empty | PatchLogState::Collecting => {
                self.state = PatchLogState::Sealed;
                Ok(())
            }
            PatchLogState::Sealed => Ok(()),
            state => Err(Error::invalid_operation(format!(
                "seal a patch log in state {state:?}"
            ))),
        }
    }

    /// Iterates the records in log order.
    pub fn iter(&self) -> Result<PatchIterator<'_>> {
        if self.state == PatchLogState::Discarded {
            return Err(Error::invalid_operation("iterate a discarded patch log"));
        }
        Ok(PatchIterator {
            inner: self.records.iter(),
        })
    }

    /// Applies the last record of every `(doc, attribute)` pair, in log order, skipping
    /// documents reported deleted. The log must be sealed; it becomes `Replayed`.
    pub fn replay(
        &mut self,
        is_deleted: impl Fn(DocId) -> bool,
        mut apply: impl FnMut(&PatchRecord) -> Result<()>,
    ) -> Result<ReplayStats> {
        if self.state != PatchLogState::Sealed {
            return Err(Error::invalid_operation(format!(
                "replay a patch log in state {:?}",
                self.state
            )));
        }
        let last = self.last_positions();
        let mut stats = ReplayStats::default();
        for (pos, record) in self.records.iter().enumerate() {
            if last.get(&(record.doc_id, record.attr_id)) != Some(&pos) {
                stats.superseded += 1;
            } else if is_deleted(record.doc_id) {
                stats.skipped_deleted += 1;
            } else {
                apply(record)?;
                stats.applied += 1;
            }
        }
        self.state = PatchLogState::Replayed;
        Ok(stats)
    }

    /// Latest record per `(doc, attribute)` pair, without changing the log state.
    pub fn latest(&self) -> AHashMap<(DocId, AttrId), &PatchRecord> {
        let mut latest = AHashMap::with_capacity(self.records.len());
        for record in &self.records {
            latest.insert((record.doc_id, record.attr_id), record);
        }
        latest
    }

    fn last_positions(&self) -> AHashMap<(DocId, AttrId), usize> {
        let mut last = AHashMap::with_capacity(self.records.len());
        for (pos, record) in self.records.iter().enumerate() {
            last.insert((record.doc_id, record.attr_id), pos);
        }
        last
    }

    /// Drops the records; the log cannot be used afterwards.
    pub fn discard(&mut self) {
        self.records = Vec::new();
        self.state = PatchLogState::Discarded;
    }

    /// Serializes a sealed log.
    pub fn dump(&self) -> Result<Vec<u8>> {
        if !matches!(self.state, PatchLogState::Sealed | PatchLogState::Replayed) {
            return Err(Error::invalid_operation(format!(
                "dump a patch log in state {:?}",
                self.state
            )));
        }
        let body_len = self
            .records
            .iter()
            .map(|r| RECORD_HEADER_LEN + r.value.len())
            .sum::<usize>();
        let mut out = Vec::with_capacity(HEADER_LEN + body_len + checksum::CHECKSUM_SIZE);
        out.extend_from_slice(&PATCH_MAGIC);
        out.extend_from_slice(&PATCH_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for record in &self.records {
            out.extend_from_slice(&record.doc_id.to_le_bytes());
            out.extend_from_slice(&record.attr_id.to_le_bytes());
            out.push(if record.is_null { FLAG_NULL } else { 0 });
            out.extend_from_slice(&(record.value.len() as u32).to_le_bytes());
            out.extend_from_slice(&record.value);
        }
        checksum::append_checksum(&mut out);
        Ok(out)
    }

    /// Loads a dumped log as a sealed log of the given generation.
    pub fn load(buf: &[u8], generation: u32) -> Result<PatchLog> {
        let records = PatchReader::new(buf, generation)?.collect::<Result<Vec<_>>>()?;
        Ok(PatchLog {
            generation,
            state: PatchLogState::Sealed,
            records,
        })
    }

    /// Concatenates sealed logs in ascending generation order into one sealed log.
    pub fn merge_generations(logs: impl IntoIterator<Item = PatchLog>) -> Result<PatchLog> {
        let mut logs = logs.into_iter().collect::<Vec<_>>();
        logs.sort_by_key(|log| log.generation);
        let mut merged = PatchLog {
            generation: logs.last().map_or(0, |log| log.generation),
            state: PatchLogState::Sealed,
            records: Vec::with_capacity(logs.iter().map(|l| l.len()).sum()),
        };
        for log in logs {
            if log.state != PatchLogState::Sealed {
                return Err(Error::invalid_operation(format!(
                    "merge a patch log in state {:?}",
                    log.state
                )));
            }
            merged.records.extend(log.records);
        }
        Ok(merged)
    }
}

/// Single-pass iterator over the records of a [`PatchLog`].
pub struct PatchIterator<'a> {
    inner: std::slice::Iter<'a, PatchRecord>,
}

impl<'a> Iterator for PatchIterator<'a> {
    type Item = &'a PatchRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Lazily decodes the records of a dumped patch file.
///
/// The header and checksum are verified up front; each record is validated as it
/// is reached.
pub struct PatchReader<'a> {
    body: &'a [u8],
    pos: usize,
    remaining: u32,
    generation: u32,
}

impl<'a> PatchReader<'a> {
    pub fn new(buf: &'a [u8], generation: u32) -> Result<PatchReader<'a>> {
        verify_data!(patch_header, buf.len() >= HEADER_LEN + checksum::CHECKSUM_SIZE);
        verify_data!(patch_magic, buf[..4] == PATCH_MAGIC);
        let body = checksum::strip_checksum(buf, "patch")?;
        let version = u16::from_le_bytes([body[4], body[5]]);
        if version != PATCH_FORMAT_VERSION {
            return Err(Error::corrupt_data(
                "patch",
                format!("unsupported format version {version}"),
            ));
        }
        let count = u32::from_le_bytes([body[8], body[9], body[10], body[11]]);
        Ok(PatchReader {
            body,
            pos: HEADER_LEN,
            remaining: count,
            generation,
        })
    }

    fn read_record(&mut self) -> Result<PatchRecord> {
        let b = &self.body[self.pos..];
        verify_data!(patch_record, b.len() >= RECORD_HEADER_LEN);
        let doc_id = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        let attr_id = u16::from_le_bytes([b[4], b[5]]);
        let flags = b[6];
        verify_data!(patch_flags, flags & !FLAG_NULL == 0);
        let len = u32::from_le_bytes([b[7], b[8], b[9], b[10]]) as usize;
        verify_data!(patch_record, b.len() >= RECORD_HEADER_LEN + len);
        let value = b[RECORD_HEADER_LEN..RECORD_HEADER_LEN + len].to_vec();
        self.pos += RECORD_HEADER_LEN + len;
        Ok(PatchRecord {
            doc_id,
            attr_id,
            value,
            is_null: flags & FLAG_NULL != 0,
            generation: self.generation,
        })
    }
}

impl Iterator for PatchReader<'_> {
    type Item = Result<PatchRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            if self.pos != self.body.len() {
                self.pos = self.body.len();
                return Some(Err(Error::corrupt_data(
                    "patch",
                    "trailing bytes after the last record",
                )));
            }
            return None;
        }
        self.remaining -= 1;
        let record = try_or_ret_some_err!(self.read_record().inspect_err(|_| {
            self.remaining = 0;
            self.pos = self.body.len();
        }));
        Some(Ok(record))
    }
}
