//! Ordering of the added documents of a batch by the schema's sort fields.

use std::sync::Arc;

use ahash::AHashMap;
use strata_attribute::{AttrValue, Scalar, ValueCodec};
use strata_common::{Result, error::Error};
use strata_format::{FieldType, Schema, SortOrder};

use crate::{document::DocOperation, merger::MergedDocument};

struct SortKeyField {
    name: String,
    codec: ValueCodec,
    order: SortOrder,
}

/// Sorts `Add` documents by a byte-comparable key built from the sort fields.
///
/// Keys compare with plain byte order; ties keep batch order. Documents of any other
/// operation follow the sorted adds in their original order. Any document followed
/// by an add of the same key is dropped, since that add replaces its effect.
pub struct NormalSortDocSorter {
    schema: Arc<Schema>,
    fields: Vec<SortKeyField>,
}

impl NormalSortDocSorter {
    pub fn new(schema: Arc<Schema>) -> Result<NormalSortDocSorter> {
        let fields = schema
            .sort_fields
            .iter()
            .map(|sort| {
                let field = schema
                    .field(&sort.field)
                    .ok_or_else(|| Error::schema_violation(&sort.field, "unknown sort field"))?;
                if field.multi_value {
                    return Err(Error::schema_violation(
                        &sort.field,
                        "sort field must be single-value",
                    ));
                }
                Ok(SortKeyField {
                    name: field.name.clone(),
                    codec: ValueCodec::new(field),
                    order: sort.order,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(NormalSortDocSorter { schema, fields })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sort key of a document. Missing fields take the field's default value.
    pub fn sort_key(&self, document: &crate::Document) -> Result<Vec<u8>> {
        let mut key = Vec::new();
        for field in &self.fields {
            let start = key.len();
            let value = match document.field(&field.name) {
                Some(value) => value.clone(),
                None => field.codec.default_value(),
            };
            encode_key_part(&field.name, field.codec.field_type(), &value, &mut key)?;
            if field.order == SortOrder::Desc {
                for b in &mut key[start..] {
                    *b = !*b;
                }
            }
        }
        Ok(key)
    }

    pub fn sort(&self, documents: Vec<MergedDocument>) -> Result<Vec<MergedDocument>> {
        if self.fields.is_empty() {
            return Ok(documents);
        }
        let (mut adds, mut others): (Vec<_>, Vec<_>) = documents
            .into_iter()
            .partition(|m| m.document.operation() == DocOperation::Add);
        let mut last_add = AHashMap::new();
        for m in &adds {
            if let Some(key) = m.document.primary_key(&self.schema) {
                let pos = last_add.entry(key).or_insert(m.position);
                *pos = (*pos).max(m.position);
            }
        }
        let superseded = |m: &MergedDocument| {
            m.document
                .primary_key(&self.schema)
                .and_then(|key| last_add.get(&key))
                .is_some_and(|&add| add > m.position)
        };
        adds.retain(|m| !superseded(m));
        others.retain(|m| !superseded(m));
        let mut keyed = adds
            .into_iter()
            .map(|m| Ok((self.sort_key(&m.document)?, m)))
            .collect::<Result<Vec<_>>>()?;
        // Stable: equal keys keep batch order.
        keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(keyed
            .into_iter()
            .map(|(_, m)| m)
            .chain(others)
            .collect())
    }
}

/// Appends the order-preserving encoding of one value: a presence byte (0 for null,
/// 1 otherwise) followed by the value bytes.
fn encode_key_part(name: &str, ty: FieldType, value: &AttrValue, out: &mut Vec<u8>) -> Result<()> {
    match value {
        AttrValue::Null => out.push(0),
        AttrValue::String(s) if ty.is_string() => {
            out.push(1);
            // 0x00 is escaped so that a shorter string sorts before its extensions.
            for &b in s.as_bytes() {
                if b == 0 {
                    out.extend_from_slice(&[0, 0xff]);
                } else {
                    out.push(b);
                }
            }
            out.extend_from_slice(&[0, 0]);
        }
        AttrValue::Scalar(s) if !ty.is_string() => {
            let s = s.cast(ty).ok_or_else(|| {
                Error::invalid_arg(name, format!("{s:?} does not fit sort field type {ty:?}"))
            })?;
            out.push(1);
            encode_scalar(s, out);
        }
        other => {
            return Err(Error::invalid_arg(
                name,
                format!("{other:?} cannot be used as a sort key of type {ty:?}"),
            ));
        }
    }
    Ok(())
}

fn encode_scalar(s: Scalar, out: &mut Vec<u8>) {
    match s {
        Scalar::UInt8(v) => out.push(v),
        Scalar::UInt16(v) => out.extend_from_slice(&v.to_be_bytes()),
        Scalar::UInt32(v) => out.extend_from_slice(&v.to_be_bytes()),
        Scalar::UInt64(v) => out.extend_from_slice(&v.to_be_bytes()),
        Scalar::Int8(v) => out.push((v as u8) ^ 0x80),
        Scalar::Int16(v) => out.extend_from_slice(&((v as u16) ^ (1 << 15)).to_be_bytes()),
        Scalar::Int32(v) => out.extend_from_slice(&((v as u32) ^ (1 << 31)).to_be_bytes()),
        Scalar::Int64(v) => out.extend_from_slice(&((v as u64) ^ (1 << 63)).to_be_bytes()),
        Scalar::Float(v) => {
            let bits = v.to_bits();
            let bits = if bits >> 31 == 1 { !bits } else { bits | (1 << 31) };
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Scalar::Double(v) => {
            let bits = v.to_bits();
            let bits = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
            out.extend_from_slice(&bits.to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use strata_format::{FieldConfig, SortField};

    use super::*;
    use crate::Document;

    fn sorter(order: SortOrder) -> NormalSortDocSorter {
        let schema = Schema {
            fields: vec![
                FieldConfig::new(0, "pk", FieldType::String),
                FieldConfig::new(1, "score", FieldType::Int32),
                FieldConfig::new(2, "name", FieldType::String).nullable(),
            ],
            primary_key: Some("pk".into()),
            sort_fields: vec![
                SortField {
                    field: "score".into(),
                    order,
                },
                SortField {
                    field: "name".into(),
                    order: SortOrder::Asc,
                },
            ],
            ..Default::default()
        };
        NormalSortDocSorter::new(Arc::new(schema)).unwrap()
    }

    fn merged(docs: Vec<Document>) -> Vec<MergedDocument> {
        docs.into_iter()
            .enumerate()
            .map(|(position, document)| MergedDocument {
                position,
                document,
                merged_count: 1,
            })
            .collect()
    }

    fn positions(docs: &[MergedDocument]) -> Vec<usize> {
        docs.iter().map(|m| m.position).collect()
    }

    #[test]
    fn test_sort_by_key_then_position() {
        let docs = merged(vec![
            Document::add().with_field("pk", "a").with_field("score", 5i32),
            Document::update().with_field("pk", "x").with_field("score", -100i32),
            Document::add().with_field("pk", "b").with_field("score", -3i32),
            Document::add().with_field("pk", "c").with_field("score", 5i32),
            Document::delete().with_field("pk", "y"),
            Document::add().with_field("pk", "d"),
        ]);
        let sorted = sorter(SortOrder::Asc).sort(docs.clone()).unwrap();
        assert_eq!(positions(&sorted), vec![2, 5, 0, 3, 1, 4]);

        let sorted = sorter(SortOrder::Desc).sort(docs).unwrap();
        assert_eq!(positions(&sorted), vec![0, 3, 5, 2, 1, 4]);
    }

    #[test]
    fn test_operations_superseded_by_later_add_dropped() {
        let docs = merged(vec![
            Document::delete().with_field("pk", "a"),
            Document::add().with_field("pk", "a").with_field("score", 2i32),
            Document::add().with_field("pk", "b").with_field("score", 1i32),
            Document::delete().with_field("pk", "b"),
        ]);
        let sorted = sorter(SortOrder::Asc).sort(docs).unwrap();
        assert_eq!(positions(&sorted), vec![2, 1, 3]);
    }

    #[test]
    fn test_only_last_add_of_a_key_kept() {
        let docs = merged(vec![
            Document::add().with_field("pk", "a").with_field("score", 30i32),
            Document::add().with_field("pk", "b").with_field("score", 20i32),
            Document::add().with_field("pk", "a").with_field("score", 10i32),
        ]);
        let sorted = sorter(SortOrder::Asc).sort(docs).unwrap();
        assert_eq!(positions(&sorted), vec![2, 1]);
    }

    #[test]
    fn test_secondary_string_key() {
        let docs = merged(vec![
            Document::add().with_field("score", 1i32).with_field("name", "bb"),
            Document::add().with_field("score", 1i32).with_field("name", "b"),
            Document::add().with_field("score", 1i32),
            Document::add().with_field("score", 1i32).with_field("name", "a\0z"),
            Document::add().with_field("score", 1i32).with_field("name", "a"),
        ]);
        let sorted = sorter(SortOrder::Asc).sort(docs).unwrap();
        assert_eq!(positions(&sorted), vec![2, 4, 3, 1, 0]);
    }

    #[test]
    fn test_numeric_encodings_are_order_preserving() {
        let mut rng = fastrand::Rng::with_seed(11);
        let mut pairs = Vec::new();
        for _ in 0..500 {
            let v = rng.i64(..);
            let f = (rng.f64() - 0.5) * 1e6;
            pairs.push((v, f));
        }
        let key = |s: Scalar| {
            let mut out = Vec::new();
            encode_scalar(s, &mut out);
            out
        };
        for w in pairs.windows(2) {
            let (a, b) = (w[0], w[1]);
            assert_eq!(a.0.cmp(&b.0), key(Scalar::Int64(a.0)).cmp(&key(Scalar::Int64(b.0))));
            assert_eq!(
                a.1.partial_cmp(&b.1).unwrap(),
                key(Scalar::Double(a.1)).cmp(&key(Scalar::Double(b.1)))
            );
        }
    }

    #[test]
    fn test_mismatched_value_rejected() {
        let docs = merged(vec![Document::add().with_field("score", "high")]);
        assert!(sorter(SortOrder::Asc).sort(docs).is_err());
    }
}
