use std::sync::Arc;

use strata_common::{Result, ids::AttrId};
use strata_format::{FieldConfig, Schema};

use crate::{codec::ValueCodec, pack::PackLayout};

/// What an attribute stores: a single field, or a pack of fixed-width fields.
#[derive(Debug, Clone)]
pub enum AttributeKind {
    Field(ValueCodec),
    Pack(Arc<PackLayout>),
}

/// Storage-level description of one attribute.
#[derive(Debug, Clone)]
pub struct AttributeConfig {
    pub id: AttrId,
    pub name: String,
    pub kind: AttributeKind,
    pub updatable: bool,
}

impl AttributeConfig {
    pub fn for_field(field: &FieldConfig) -> AttributeConfig {
        AttributeConfig {
            id: field.id,
            name: field.name.clone(),
            kind: AttributeKind::Field(ValueCodec::new(field)),
            updatable: field.updatable,
        }
    }

    pub fn for_pack(layout: PackLayout) -> AttributeConfig {
        AttributeConfig {
            id: layout.id(),
            name: layout.name().to_string(),
            updatable: layout.is_updatable(),
            kind: AttributeKind::Pack(Arc::new(layout)),
        }
    }

    /// All attributes of the schema: standalone fields first, then packs.
    pub fn from_schema(schema: &Schema) -> Result<Vec<Arc<AttributeConfig>>> {
        let mut configs = schema
            .standalone_fields()
            .map(|f| Arc::new(AttributeConfig::for_field(f)))
            .collect::<Vec<_>>();
        for pack in &schema.packs {
            configs.push(Arc::new(AttributeConfig::for_pack(PackLayout::new(
                schema, pack,
            )?)));
        }
        Ok(configs)
    }

    pub fn codec(&self) -> Option<&ValueCodec> {
        match &self.kind {
            AttributeKind::Field(codec) => Some(codec),
            AttributeKind::Pack(_) => None,
        }
    }

    pub fn pack(&self) -> Option<&Arc<PackLayout>> {
        match &self.kind {
            AttributeKind::Field(_) => None,
            AttributeKind::Pack(layout) => Some(layout),
        }
    }

    pub fn fixed_width(&self) -> Option<usize> {
        match &self.kind {
            AttributeKind::Field(codec) => codec.fixed_width(),
            AttributeKind::Pack(layout) => Some(layout.record_width()),
        }
    }

    pub fn is_fixed_width(&self) -> bool {
        self.fixed_width().is_some()
    }

    /// Encoded length of the value at the start of `buf`.
    pub fn encoded_len(&self, buf: &[u8]) -> Result<usize> {
        match &self.kind {
            AttributeKind::Field(codec) => codec.decode_length(buf),
            AttributeKind::Pack(layout) => {
                strata_common::verify_data!(pack_record, buf.len() >= layout.record_width());
                Ok(layout.record_width())
            }
        }
    }

    pub fn is_null(&self, buf: &[u8]) -> bool {
        self.codec().is_some_and(|c| c.is_null(buf))
    }

    /// Encoded value written for documents that do not provide the attribute.
    pub fn default_encoded(&self) -> Result<Vec<u8>> {
        match &self.kind {
            AttributeKind::Field(codec) => codec.encode(&codec.default_value()),
            AttributeKind::Pack(layout) => layout.default_record(),
        }
    }
}
