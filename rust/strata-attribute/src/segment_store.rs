//! Read/update surface of one attribute within one segment.
//!
//! Fixed-width values are addressed by `doc_id * width` and updated by overwriting
//! their bytes in place. Variable-length values are addressed through an
//! [`OffsetTable`]; their length is always derived from the value itself, so an entry
//! can be redirected to a new copy of the value without touching its neighbours.
//!
//! Building segments append new copies of updated variable-length values to the end of
//! their data. Built segments keep their base data immutable and route such updates
//! into an extension overlay: a mutable copy of the offset table plus an extension data
//! buffer addressed past the end of the base data. The overlay can be persisted as
//! `offset.extend64` and `extend_slice_data`.

use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use strata_budget_tracker::MemoryQuota;
use strata_common::{
    Result,
    error::Error,
    ids::{DocId, SegmentId},
    verify_arg, verify_data,
};
use strata_format::{DataInfo, checksum, layout};
use strata_io::{Directory, join_path};

use crate::{
    codec::{AttrValue, encode_null},
    config::AttributeConfig,
    memory::MemoryCharge,
    offset_table::OffsetTable,
    writer::AttributeDataWriter,
};

struct Extension {
    offsets: OffsetTable,
    data: RwLock<Vec<u8>>,
    base_len: u64,
    charge: MemoryCharge,
}

pub struct AttributeSegmentStore {
    config: Arc<AttributeConfig>,
    segment_id: SegmentId,
    building: bool,
    doc_count: AtomicU32,
    data: RwLock<Vec<u8>>,
    data_charge: MemoryCharge,
    /// Variable-length attributes only: the building table, or the read-only base table.
    offsets: Option<OffsetTable>,
    extension: RwLock<Option<Arc<Extension>>>,
    applied_generation: Mutex<Option<u32>>,
    dirty: AtomicBool,
    quota: MemoryQuota,
}

impl AttributeSegmentStore {
    /// Creates an empty, appendable store for a building segment.
    pub fn create_building(
        config: Arc<AttributeConfig>,
        segment_id: SegmentId,
        quota: &MemoryQuota,
    ) -> Result<AttributeSegmentStore> {
        let offsets = if config.is_fixed_width() {
            None
        } else {
            Some(OffsetTable::new_building(quota)?)
        };
        Ok(AttributeSegmentStore {
            config,
            segment_id,
            building: true,
            doc_count: AtomicU32::new(0),
            data: RwLock::new(Vec::new()),
            data_charge: MemoryCharge::new(quota, "building attribute data"),
            offsets,
            extension: RwLock::new(None),
            applied_generation: Mutex::new(None),
            dirty: AtomicBool::new(false),
            quota: quota.clone(),
        })
    }

    /// Opens the persisted attribute under `segment_path`, validating it against the
    /// segment's doc count.
    pub fn open(
        dir: &dyn Directory,
        segment_path: &str,
        config: Arc<AttributeConfig>,
        segment_id: SegmentId,
        doc_count: u32,
        quota: &MemoryQuota,
    ) -> Result<AttributeSegmentStore> {
        Self::open_impl(dir, segment_path, config.clone(), segment_id, doc_count, quota)
            .map_err(|e| e.in_segment(segment_id, Some(&config.name)))
    }

    fn open_impl(
        dir: &dyn Directory,
        segment_path: &str,
        config: Arc<AttributeConfig>,
        segment_id: SegmentId,
        doc_count: u32,
        quota: &MemoryQuota,
    ) -> Result<AttributeSegmentStore> {
        let attr_path = join_path(segment_path, &layout::attribute_dir(&config.name));
        let read = |name: &str| {
            let path = join_path(&attr_path, name);
            dir.read_file(&path).map_err(|e| Error::io(path, e))
        };

        let info = DataInfo::from_json(&read(layout::DATA_INFO_FILE)?)?;
        if info.doc_count != doc_count {
            return Err(Error::index_collapsed(
                "data_info",
                format!("doc count {} != segment doc count {doc_count}", info.doc_count),
            ));
        }
        let data = read(layout::DATA_FILE)?;
        if data.len() as u64 != info.data_length {
            return Err(Error::index_collapsed(
                "data",
                format!("length {} != recorded {}", data.len(), info.data_length),
            ));
        }
        checksum::validate_buffer(&data, info.data_checksum, Some("data"))?;

        let data_charge = MemoryCharge::new(quota, "attribute data");
        data_charge.ensure(data.len() as u64)?;

        let mut offsets = None;
        let mut extension = None;
        match config.fixed_width() {
            Some(width) => {
                if data.len() != doc_count as usize * width {
                    return Err(Error::index_collapsed(
                        "data",
                        format!(
                            "length {} != {doc_count} docs of {width} bytes",
                            data.len()
                        ),
                    ));
                }
            }
            None => {
                let table = OffsetTable::init(doc_count, &read(layout::OFFSET_FILE)?, false, quota)?;
                let values = table.to_vec();
                if values.windows(2).any(|w| w[0] > w[1]) {
                    return Err(Error::corrupt_data("offset", "offsets are not monotonic"));
                }
                if values[doc_count as usize] != data.len() as u64 {
                    return Err(Error::index_collapsed(
                        "offset",
                        format!(
                            "last offset {} != data length {}",
                            values[doc_count as usize],
                            data.len()
                        ),
                    ));
                }
                offsets = Some(table);

                let ext_offsets_path = join_path(&attr_path, layout::OFFSET_EXTEND_FILE);
                if dir.exists(&ext_offsets_path) {
                    extension = Some(Arc::new(Self::open_extension(
                        &read(layout::OFFSET_EXTEND_FILE)?,
                        read(layout::EXTEND_SLICE_DATA_FILE)?.to_vec(),
                        doc_count,
                        data.len() as u64,
                        quota,
                    )?));
                }
            }
        }

        Ok(AttributeSegmentStore {
            config,
            segment_id,
            building: false,
            doc_count: AtomicU32::new(doc_count),
            data: RwLock::new(data.to_vec()),
            data_charge,
            offsets,
            applied_generation: Mutex::new(if extension.is_some() {
                info.extension_patch_generation
            } else {
                None
            }),
            extension: RwLock::new(extension),
            dirty: AtomicBool::new(false),
            quota: quota.clone(),
        })
    }

    fn open_extension(
        offsets_buf: &[u8],
        data: Vec<u8>,
        doc_count: u32,
        base_len: u64,
        quota: &MemoryQuota,
    ) -> Result<Extension> {
        if offsets_buf.len() != (doc_count as usize + 1) * 8 {
            return Err(Error::index_collapsed(
                layout::OFFSET_EXTEND_FILE,
                format!("length {} for doc count {doc_count}", offsets_buf.len()),
            ));
        }
        let offsets = OffsetTable::init(doc_count, offsets_buf, true, quota)?;
        let end = base_len + data.len() as u64;
        verify_data!(
            offset_extend64,
            offsets.to_vec()[..doc_count as usize].iter().all(|&o| o < end)
        );
        let charge = MemoryCharge::new(quota, "attribute extension");
        charge.ensure(data.len() as u64)?;
        Ok(Extension {
            offsets,
            data: RwLock::new(data),
            base_len,
            charge,
        })
    }

    pub fn config(&self) -> &Arc<AttributeConfig> {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count.load(Ordering::Acquire)
    }

    pub fn is_building(&self) -> bool {
        self.building
    }

    /// Whether any value was appended or updated since the store was created or opened.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn has_extension(&self) -> bool {
        self.extension.read().expect("extension lock").is_some()
    }

    /// Highest patch generation already contained in the persisted extension.
    pub fn applied_patch_generation(&self) -> Option<u32> {
        *self.applied_generation.lock().expect("generation lock")
    }

    /// Width of the offset entries currently used for reads; 0 for fixed-width attributes.
    pub fn offset_width(&self) -> usize {
        if let Some(ext) = self.extension() {
            return ext.offsets.width();
        }
        self.offsets.as_ref().map_or(0, |t| t.width())
    }

    pub fn memory_usage(&self) -> u64 {
        let ext = self
            .extension()
            .map_or(0, |e| e.charge.charged() + e.offsets.memory_usage());
        self.data_charge.charged() + self.offsets.as_ref().map_or(0, |t| t.memory_usage()) + ext
    }

    /// Appends the encoded value of the next document of a building segment.
    pub fn append(&self, encoded: &[u8]) -> Result<DocId> {
        if !self.building {
            return Err(Error::invalid_operation("append to a built attribute"));
        }
        self.verify_encoded(encoded)?;
        let doc_id = self.doc_count();
        let end = self.write_building_data(encoded)?;
        if let Some(offsets) = &self.offsets {
            offsets.push(end)?;
        }
        self.doc_count.store(doc_id + 1, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
        Ok(doc_id)
    }

    pub fn append_value(&self, value: &AttrValue) -> Result<DocId> {
        let codec = self
            .config
            .codec()
            .ok_or_else(|| Error::invalid_operation("append_value on a pack attribute"))?;
        self.append(&codec.encode(value)?)
    }

    /// Returns the encoded bytes of a document's value and whether it is null.
    pub fn read(&self, doc_id: DocId) -> Result<(Vec<u8>, bool)> {
        verify_arg!(doc_id, doc_id < self.doc_count());
        let bytes = match self.config.fixed_width() {
            Some(width) => {
                let data = self.data.read().expect("data lock");
                let start = doc_id as usize * width;
                verify_data!(data, start + width <= data.len());
                data[start..start + width].to_vec()
            }
            None => self.read_variable(doc_id)?,
        };
        let is_null = self.config.is_null(&bytes);
        Ok((bytes, is_null))
    }

    pub fn read_value(&self, doc_id: DocId) -> Result<AttrValue> {
        let (bytes, _) = self.read(doc_id)?;
        match self.config.codec() {
            Some(codec) => codec.decode(&bytes),
            None => Err(Error::invalid_operation("read_value on a pack attribute")),
        }
    }

    fn read_variable(&self, doc_id: DocId) -> Result<Vec<u8>> {
        let extension = self.extension();
        let start = match &extension {
            Some(ext) => ext.offsets.get_offset(doc_id)?,
            None => self.base_offsets()?.get_offset(doc_id)?,
        };
        match &extension {
            Some(ext) if start >= ext.base_len => {
                let data = ext.data.read().expect("extension lock");
                self.slice_value(&data, start - ext.base_len)
            }
            _ => {
                let data = self.data.read().expect("data lock");
                self.slice_value(&data, start)
            }
        }
    }

    fn slice_value(&self, data: &[u8], start: u64) -> Result<Vec<u8>> {
        verify_data!(offset, start < data.len() as u64);
        let tail = &data[start as usize..];
        let len = self.config.encoded_len(tail)?;
        Ok(tail[..len].to_vec())
    }

    /// Replaces the value of an updatable attribute.
    ///
    /// Fixed-width values are overwritten in place. Variable-length values get a new
    /// copy and the document's offset is redirected to it.
    pub fn update_field(&self, doc_id: DocId, encoded: &[u8], is_null: bool) -> Result<()> {
        if !self.config.updatable {
            return Err(Error::schema_violation(
                self.name(),
                "attribute is not updatable",
            ));
        }
        verify_arg!(doc_id, doc_id < self.doc_count());
        if self.config.is_fixed_width() {
            if is_null {
                return Err(Error::schema_violation(
                    self.name(),
                    "fixed-width attributes cannot hold null",
                ));
            }
            return self.update_in_place(doc_id, encoded);
        }

        let mut null_buf = Vec::new();
        let encoded = if is_null {
            let supports_null = self.config.codec().is_some_and(|c| c.supports_null());
            if !supports_null {
                return Err(Error::schema_violation(
                    self.name(),
                    "null value for an attribute without null support",
                ));
            }
            encode_null(&mut null_buf);
            &null_buf[..]
        } else {
            encoded
        };
        self.verify_encoded(encoded)?;
        self.update_variable(doc_id, encoded)
    }

    /// Overwrites the bytes of a fixed-width value.
    ///
    /// Variable-length attributes cannot be updated in place; doing so is a
    /// `SchemaViolation`.
    pub fn update_in_place(&self, doc_id: DocId, encoded: &[u8]) -> Result<()> {
        let Some(width) = self.config.fixed_width() else {
            return Err(Error::schema_violation(
                self.name(),
                "in-place update of a variable-length attribute",
            ));
        };
        verify_arg!(encoded, encoded.len() == width);
        verify_arg!(doc_id, doc_id < self.doc_count());
        let start = doc_id as usize * width;
        let mut data = self.data.write().expect("data lock");
        data[start..start + width].copy_from_slice(encoded);
        drop(data);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn update_variable(&self, doc_id: DocId, encoded: &[u8]) -> Result<()> {
        if self.building {
            let offsets = self.base_offsets()?;
            let start = {
                let data = self.data.read().expect("data lock");
                data.len() as u64
            };
            let end = self.write_building_data(encoded)?;
            offsets.set_offset(doc_id, start)?;
            offsets.set_offset(self.doc_count(), end)?;
        } else {
            let ext = self.get_or_create_extension()?;
            let pos = {
                let mut data = ext.data.write().expect("extension lock");
                ext.charge.ensure((data.len() + encoded.len()) as u64)?;
                let pos = ext.base_len + data.len() as u64;
                data.extend_from_slice(encoded);
                pos
            };
            ext.offsets.set_offset(doc_id, pos)?;
            ext.offsets.set_offset(self.doc_count(), pos + encoded.len() as u64)?;
        }
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn write_building_data(&self, encoded: &[u8]) -> Result<u64> {
        let mut data = self.data.write().expect("data lock");
        self.data_charge
            .ensure((data.len() + encoded.len()) as u64)?;
        data.extend_from_slice(encoded);
        Ok(data.len() as u64)
    }

    fn get_or_create_extension(&self) -> Result<Arc<Extension>> {
        if let Some(ext) = self.extension() {
            return Ok(ext);
        }
        let base = self.base_offsets()?;
        let ext = Arc::new(Extension {
            offsets: base.clone_mutable(&self.quota)?,
            data: RwLock::new(Vec::new()),
            base_len: self.data.read().expect("data lock").len() as u64,
            charge: MemoryCharge::new(&self.quota, "attribute extension"),
        });
        *self.extension.write().expect("extension lock") = Some(ext.clone());
        Ok(ext)
    }

    fn extension(&self) -> Option<Arc<Extension>> {
        self.extension.read().expect("extension lock").clone()
    }

    fn base_offsets(&self) -> Result<&OffsetTable> {
        self.offsets
            .as_ref()
            .ok_or_else(|| Error::invalid_operation("offsets of a fixed-width attribute"))
    }

    fn verify_encoded(&self, encoded: &[u8]) -> Result<()> {
        let len = self
            .config
            .encoded_len(encoded)
            .map_err(|e| Error::invalid_arg(self.name(), e.to_string()))?;
        verify_arg!(encoded, len == encoded.len());
        Ok(())
    }

    /// Writes the current values, compacted, as a fresh attribute under `segment_path`.
    pub fn dump(&self, dir: &dyn Directory, segment_path: &str) -> Result<DataInfo> {
        let mut writer = AttributeDataWriter::new(self.config.clone(), &self.quota);
        for doc_id in 0..self.doc_count() {
            writer.append(&self.read(doc_id)?.0)?;
        }
        let attr_path = join_path(segment_path, &layout::attribute_dir(&self.config.name));
        writer.finish(dir, &attr_path)
    }

    /// Persists the extension overlay of a built attribute, recording that it contains
    /// every patch up to `generation`. Returns `false` if there is no overlay.
    pub fn persist_extension(
        &self,
        dir: &dyn Directory,
        segment_path: &str,
        generation: u32,
    ) -> Result<bool> {
        let Some(ext) = self.extension() else {
            return Ok(false);
        };
        ext.offsets.extend()?;
        let attr_path = join_path(segment_path, &layout::attribute_dir(&self.config.name));
        let write = |name: &str, bytes: &[u8]| {
            let path = join_path(&attr_path, name);
            dir.write_file(&path, bytes).map_err(|e| Error::io(path, e))
        };

        write(
            layout::EXTEND_SLICE_DATA_FILE,
            &ext.data.read().expect("extension lock"),
        )?;
        write(layout::OFFSET_EXTEND_FILE, &ext.offsets.to_bytes())?;

        let info_path = join_path(&attr_path, layout::DATA_INFO_FILE);
        let mut info = DataInfo::from_json(
            &dir.read_file(&info_path)
                .map_err(|e| Error::io(&info_path, e))?,
        )?;
        info.extension_patch_generation = Some(generation);
        write(layout::DATA_INFO_FILE, &info.to_json()?)?;

        *self.applied_generation.lock().expect("generation lock") = Some(generation);
        log::debug!(
            "segment {} attribute {}: extension persisted at patch generation {generation}",
            self.segment_id,
            self.config.name
        );
        Ok(true)
    }
}

impl std::fmt::Debug for AttributeSegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeSegmentStore")
            .field("name", &self.config.name)
            .field("segment_id", &self.segment_id)
            .field("building", &self.building)
            .field("doc_count", &self.doc_count())
            .finish()
    }
}
