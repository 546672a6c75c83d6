//! Translation between documents and per-attribute encoded values.

use std::sync::Arc;

use ahash::AHashMap;
use strata_attribute::{AttrValue, AttributeConfig, AttributeKind};
use strata_common::{
    Result,
    error::Error,
    ids::{AttrId, DocId},
};
use strata_document::Document;
use strata_format::Schema;
use strata_segment::SegmentData;

/// Where a schema field is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSlot {
    /// A standalone attribute.
    Attribute { attr_id: AttrId },
    /// Sub-field `index` of a pack attribute.
    PackMember { attr_id: AttrId, index: usize },
}

impl FieldSlot {
    pub fn attr_id(&self) -> AttrId {
        match *self {
            FieldSlot::Attribute { attr_id } | FieldSlot::PackMember { attr_id, .. } => attr_id,
        }
    }
}

#[derive(Debug)]
pub struct DocumentEncoder {
    attributes: Vec<Arc<AttributeConfig>>,
    slots: AHashMap<String, FieldSlot>,
}

impl DocumentEncoder {
    pub fn new(schema: &Schema) -> Result<DocumentEncoder> {
        let attributes = AttributeConfig::from_schema(schema)?;
        let mut slots = AHashMap::new();
        for config in &attributes {
            match &config.kind {
                AttributeKind::Field(_) => {
                    slots.insert(
                        config.name.clone(),
                        FieldSlot::Attribute { attr_id: config.id },
                    );
                }
                AttributeKind::Pack(layout) => {
                    for (index, sub) in layout.sub_fields().iter().enumerate() {
                        slots.insert(
                            sub.field.name.clone(),
                            FieldSlot::PackMember {
                                attr_id: config.id,
                                index,
                            },
                        );
                    }
                }
            }
        }
        Ok(DocumentEncoder { attributes, slots })
    }

    /// Attributes of the schema in storage order.
    pub fn attributes(&self) -> &[Arc<AttributeConfig>] {
        &self.attributes
    }

    pub fn slot(&self, field: &str) -> Result<FieldSlot> {
        self.slots
            .get(field)
            .copied()
            .ok_or_else(|| Error::schema_violation(field, "unknown field"))
    }

    /// Encodes every attribute value of an added document, in attribute order. Fields
    /// the document does not carry take their default value.
    pub fn encode(&self, document: &Document) -> Result<Vec<Vec<u8>>> {
        if let Some((name, _)) = document
            .fields()
            .find(|(name, _)| !self.slots.contains_key(*name))
        {
            return Err(Error::schema_violation(name, "unknown field"));
        }
        self.attributes
            .iter()
            .map(|config| match &config.kind {
                AttributeKind::Field(codec) => match document.field(&config.name) {
                    Some(value) => codec.encode(value),
                    None => codec.encode(&codec.default_value()),
                },
                AttributeKind::Pack(layout) => {
                    let values = layout
                        .sub_fields()
                        .iter()
                        .map(|sub| {
                            document
                                .field(&sub.field.name)
                                .cloned()
                                .unwrap_or_else(|| sub.codec.default_value())
                        })
                        .collect::<Vec<_>>();
                    layout.pack(&values)
                }
            })
            .collect()
    }

    /// Reads one field of a document.
    pub fn read_field(
        &self,
        segment: &SegmentData,
        doc_id: DocId,
        field: &str,
    ) -> Result<AttrValue> {
        let slot = self.slot(field)?;
        let store = segment.attribute(slot.attr_id()).ok_or_else(|| {
            Error::schema_violation(field, "attribute is missing")
                .in_segment(segment.segment_id(), None)
        })?;
        let value = match slot {
            FieldSlot::Attribute { .. } => store.read_value(doc_id),
            FieldSlot::PackMember { index, .. } => {
                let (record, _) = store.read(doc_id)?;
                let layout = store
                    .config()
                    .pack()
                    .ok_or_else(|| Error::invalid_operation("pack member of a plain attribute"))?;
                layout.sub_value(&record, index)
            }
        };
        value.map_err(|e| e.in_segment(segment.segment_id(), Some(field)))
    }

    /// Reads every field of a document, as an `Add` carrying the stored values.
    pub fn read_document(&self, segment: &SegmentData, doc_id: DocId) -> Result<Document> {
        let mut document = Document::add();
        for name in self.field_names() {
            document.set_field(name, self.read_field(segment, doc_id, name)?);
        }
        Ok(document)
    }

    /// Names of all fields, in storage order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().flat_map(|config| {
            let names: Vec<&str> = match &config.kind {
                AttributeKind::Field(_) => vec![config.name.as_str()],
                AttributeKind::Pack(layout) => layout
                    .sub_fields()
                    .iter()
                    .map(|sub| sub.field.name.as_str())
                    .collect(),
            };
            names
        })
    }
}

#[cfg(test)]
mod tests {
    use strata_budget_tracker::MemoryQuota;
    use strata_testkit::sample_schema;

    use super::*;

    #[test]
    fn test_encode_and_read_back() {
        let encoder = DocumentEncoder::new(&sample_schema()).unwrap();
        assert_eq!(
            encoder.slot("rank").unwrap(),
            FieldSlot::PackMember {
                attr_id: 10,
                index: 1
            }
        );
        assert!(encoder.slot("nope").is_err());

        let segment = SegmentData::create_building(
            0,
            "segment_0",
            encoder.attributes(),
            1,
            &MemoryQuota::unlimited(),
        )
        .unwrap();
        let doc = Document::add()
            .with_field("id", "a")
            .with_field("price", 12i64)
            .with_field("rank", -4i32)
            .with_field("tags", AttrValue::strings(["x", "y"]));
        let values = encoder.encode(&doc).unwrap();
        assert_eq!(values.len(), encoder.attributes().len());
        let doc_id = segment.add_document(&values).unwrap();

        let read = |name: &str| encoder.read_field(&segment, doc_id, name).unwrap();
        assert_eq!(read("price"), AttrValue::from(12i64));
        assert_eq!(read("rank"), AttrValue::from(-4i32));
        assert_eq!(read("flag"), AttrValue::from(0u8));
        assert_eq!(read("title"), AttrValue::Null);

        let read = encoder.read_document(&segment, doc_id).unwrap();
        assert_eq!(read.field_count(), 7);
        assert_eq!(read.field("tags"), Some(&AttrValue::strings(["x", "y"])));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let encoder = DocumentEncoder::new(&sample_schema()).unwrap();
        let doc = Document::add().with_field("id", "a").with_field("color", "red");
        let err = encoder.encode(&doc).unwrap_err();
        assert!(matches!(
            err.kind(),
            strata_common::error::ErrorKind::SchemaViolation { field, .. } if field == "color"
        ));
    }
}
