//! Pack attributes: several fixed-width fields stored as one record per document.

use strata_common::{Result, error::Error, ids::AttrId, verify_arg, verify_data};
use strata_format::{FieldConfig, PackConfig, Schema};

use crate::codec::{AttrValue, ValueCodec};

#[derive(Debug, Clone)]
pub struct PackSubField {
    pub field: FieldConfig,
    pub codec: ValueCodec,
    /// Byte offset of the sub-field inside the record.
    pub offset: usize,
    pub width: usize,
}

/// Byte layout of a pack record.
#[derive(Debug, Clone)]
pub struct PackLayout {
    id: AttrId,
    name: String,
    sub_fields: Vec<PackSubField>,
    record_width: usize,
}

impl PackLayout {
    pub fn new(schema: &Schema, pack: &PackConfig) -> Result<PackLayout> {
        let mut sub_fields = Vec::with_capacity(pack.sub_fields.len());
        let mut offset = 0;
        for name in &pack.sub_fields {
            let field = schema
                .field(name)
                .ok_or_else(|| Error::schema_violation(name, "unknown pack sub-field"))?;
            let width = field.fixed_width().ok_or_else(|| {
                Error::schema_violation(name, "pack sub-fields must be fixed-width")
            })?;
            sub_fields.push(PackSubField {
                field: field.clone(),
                codec: ValueCodec::new(field),
                offset,
                width,
            });
            offset += width;
        }
        Ok(PackLayout {
            id: pack.id,
            name: pack.name.clone(),
            sub_fields,
            record_width: offset,
        })
    }

    pub fn id(&self) -> AttrId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_width(&self) -> usize {
        self.record_width
    }

    pub fn sub_fields(&self) -> &[PackSubField] {
        &self.sub_fields
    }

    pub fn sub_field_index(&self, field_id: AttrId) -> Option<usize> {
        self.sub_fields.iter().position(|s| s.field.id == field_id)
    }

    pub fn is_updatable(&self) -> bool {
        self.sub_fields.iter().any(|s| s.field.updatable)
    }

    /// Encodes a full record; `values` follows sub-field order.
    pub fn pack(&self, values: &[AttrValue]) -> Result<Vec<u8>> {
        verify_arg!(values, values.len() == self.sub_fields.len());
        let mut record = Vec::with_capacity(self.record_width);
        for (sub, value) in self.sub_fields.iter().zip(values) {
            sub.codec.encode_into(value, &mut record)?;
        }
        Ok(record)
    }

    /// Record holding the default value of every sub-field.
    pub fn default_record(&self) -> Result<Vec<u8>> {
        let defaults = self
            .sub_fields
            .iter()
            .map(|s| s.codec.default_value())
            .collect::<Vec<_>>();
        self.pack(&defaults)
    }

    pub fn unpack(&self, record: &[u8]) -> Result<Vec<AttrValue>> {
        (0..self.sub_fields.len())
            .map(|idx| self.sub_value(record, idx))
            .collect()
    }

    pub fn sub_value(&self, record: &[u8], idx: usize) -> Result<AttrValue> {
        verify_data!(pack_record, record.len() == self.record_width);
        let sub = self
            .sub_fields
            .get(idx)
            .ok_or_else(|| Error::invalid_arg("idx", format!("pack has no sub-field {idx}")))?;
        sub.codec.decode(&record[sub.offset..sub.offset + sub.width])
    }

    /// Rewrites the bytes of one sub-field inside `record`, leaving the others untouched.
    pub fn repack(&self, record: &mut [u8], idx: usize, value: &AttrValue) -> Result<()> {
        verify_arg!(record, record.len() == self.record_width);
        let sub = self
            .sub_fields
            .get(idx)
            .ok_or_else(|| Error::invalid_arg("idx", format!("pack has no sub-field {idx}")))?;
        let encoded = sub.codec.encode(value)?;
        record[sub.offset..sub.offset + sub.width].copy_from_slice(&encoded);
        Ok(())
    }
}
