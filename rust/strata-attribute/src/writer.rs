use std::sync::Arc;

use ahash::AHashSet;
use strata_budget_tracker::MemoryQuota;
use strata_common::{Result, error::Error, verify_data};
use strata_format::{DataInfo, checksum, layout};
use strata_io::{Directory, join_path};

use crate::{config::AttributeConfig, memory::MemoryCharge};

/// Writes the `data`, `offset` and `data_info` files of one attribute.
///
/// Values are appended in doc id order. The offset table is written narrow (32-bit)
/// unless the data outgrows it. Fixed-width attributes have no offset file.
pub struct AttributeDataWriter {
    config: Arc<AttributeConfig>,
    data: Vec<u8>,
    offsets: Vec<u64>,
    doc_count: u32,
    uniq: AHashSet<u64>,
    max_item_len: usize,
    charge: MemoryCharge,
}

impl AttributeDataWriter {
    pub fn new(config: Arc<AttributeConfig>, quota: &MemoryQuota) -> AttributeDataWriter {
        let offsets = if config.is_fixed_width() {
            Vec::new()
        } else {
            vec![0]
        };
        AttributeDataWriter {
            config,
            data: Vec::new(),
            offsets,
            doc_count: 0,
            uniq: AHashSet::new(),
            max_item_len: 0,
            charge: MemoryCharge::new(quota, "attribute writer"),
        }
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Appends the encoded value of the next document.
    pub fn append(&mut self, encoded: &[u8]) -> Result<()> {
        let len = self.config.encoded_len(encoded)?;
        verify_data!(encoded_value, len == encoded.len());
        let needed = self.data.len() + encoded.len() + self.offsets.len() * 8 + 8;
        self.charge.ensure(needed as u64)?;

        self.data.extend_from_slice(encoded);
        if !self.config.is_fixed_width() {
            self.offsets.push(self.data.len() as u64);
        }
        self.uniq.insert(xxhash_rust::xxh3::xxh3_64(encoded));
        self.max_item_len = self.max_item_len.max(encoded.len());
        self.doc_count += 1;
        Ok(())
    }

    /// Writes the files under `attr_path` and returns the recorded sidecar.
    pub fn finish(self, dir: &dyn Directory, attr_path: &str) -> Result<DataInfo> {
        dir.create_dir_all(attr_path)
            .map_err(|e| Error::io(attr_path, e))?;

        let data_path = join_path(attr_path, layout::DATA_FILE);
        dir.write_file(&data_path, &self.data)
            .map_err(|e| Error::io(&data_path, e))?;

        let mut offset_width = 0;
        if !self.config.is_fixed_width() {
            let end = self.offsets.last().copied().unwrap_or(0);
            let bytes = if end <= u32::MAX as u64 {
                offset_width = 4;
                self.offsets
                    .iter()
                    .flat_map(|&o| (o as u32).to_le_bytes())
                    .collect::<Vec<_>>()
            } else {
                offset_width = 8;
                self.offsets
                    .iter()
                    .flat_map(|o| o.to_le_bytes())
                    .collect::<Vec<_>>()
            };
            let offset_path = join_path(attr_path, layout::OFFSET_FILE);
            dir.write_file(&offset_path, &bytes)
                .map_err(|e| Error::io(&offset_path, e))?;
        }

        let info = DataInfo {
            doc_count: self.doc_count,
            uniq_item_count: self.uniq.len() as u32,
            max_item_len: self.max_item_len as u32,
            data_length: self.data.len() as u64,
            offset_width,
            data_checksum: checksum::compute(&self.data),
            extension_patch_generation: None,
        };
        let info_path = join_path(attr_path, layout::DATA_INFO_FILE);
        dir.write_file(&info_path, &info.to_json()?)
            .map_err(|e| Error::io(&info_path, e))?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use strata_format::{FieldConfig, FieldType};
    use strata_io::MemoryDirectory;

    use super::*;
    use crate::codec::AttrValue;

    #[test]
    fn test_writes_offsets_and_stats() {
        let field = FieldConfig::new(1, "tags", FieldType::String).multi_value();
        let config = Arc::new(AttributeConfig::for_field(&field));
        let codec = config.codec().unwrap().clone();
        let dir = MemoryDirectory::new();
        let mut writer = AttributeDataWriter::new(config, &MemoryQuota::unlimited());
        for value in [
            AttrValue::strings(["a", "b"]),
            AttrValue::strings(["a", "b"]),
            AttrValue::strings(["long value"]),
        ] {
            writer.append(&codec.encode(&value).unwrap()).unwrap();
        }
        let info = writer.finish(&dir, "attribute/tags").unwrap();
        assert_eq!(info.doc_count, 3);
        assert_eq!(info.uniq_item_count, 2);
        assert_eq!(info.offset_width, 4);
        let data = dir.read_file("attribute/tags/data").unwrap();
        assert_eq!(info.data_length, data.len() as u64);
        assert_eq!(info.data_checksum, checksum::compute(&data));
        assert_eq!(dir.file_len("attribute/tags/offset").unwrap(), 16);
    }

    #[test]
    fn test_rejects_malformed_value() {
        let field = FieldConfig::new(1, "price", FieldType::Int64);
        let config = Arc::new(AttributeConfig::for_field(&field));
        let mut writer = AttributeDataWriter::new(config, &MemoryQuota::unlimited());
        assert!(writer.append(&[1, 2, 3]).unwrap_err().is_corruption());
        writer.append(&[0; 8]).unwrap();
        let dir = MemoryDirectory::new();
        let info = writer.finish(&dir, "attribute/price").unwrap();
        assert_eq!(info.offset_width, 0);
        assert!(!dir.exists("attribute/price/offset"));
    }
}
