//! Collapsing of the operations a build batch carries for the same primary key.

use std::sync::Arc;

use strata_common::Result;
use strata_format::Schema;

use crate::{
    batch::DocumentBatch,
    document::{DocOperation, Document},
};

/// An effective document along with the batch position of the first operation it
/// stands for.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDocument {
    pub position: usize,
    pub document: Document,
    /// Number of batch operations folded into this document, itself included.
    pub merged_count: usize,
}

/// Reduces a batch to the minimum number of effective writes per primary key.
///
/// Per key, in arrival order:
/// - an `Add` starts a new group and absorbs the `UpdateField`s that follow it;
/// - an `UpdateField` with no open group starts one that absorbs the following
///   `UpdateField`s, later fields overwriting earlier ones;
/// - any other change of operation type closes the open group first.
///
/// Merging is disabled for schemas with sub-documents, and documents without a
/// primary key always pass through.
pub struct DocumentMerger {
    schema: Arc<Schema>,
}

impl DocumentMerger {
    pub fn new(schema: Arc<Schema>) -> DocumentMerger {
        DocumentMerger { schema }
    }

    pub fn is_enabled(&self) -> bool {
        !self.schema.has_sub_documents && self.schema.primary_key.is_some()
    }

    /// Returns the effective documents in order of the batch position they start at.
    pub fn merge(&self, batch: &DocumentBatch) -> Result<Vec<MergedDocument>> {
        if !self.is_enabled() {
            return Ok(batch
                .documents()
                .iter()
                .enumerate()
                .map(|(position, document)| MergedDocument {
                    position,
                    document: document.clone(),
                    merged_count: 1,
                })
                .collect());
        }

        let positions = batch.primary_key_positions(&self.schema)?;
        let mut merged = Vec::with_capacity(batch.len());
        for (_, group) in positions.iter() {
            let mut open: Option<MergedDocument> = None;
            for &position in group {
                let Some(doc) = batch.get(position) else {
                    continue;
                };
                let absorbing = doc.operation() == DocOperation::UpdateField
                    && open
                        .as_ref()
                        .is_some_and(|p| p.document.operation() != DocOperation::Delete);
                match open.as_mut() {
                    Some(pending) if absorbing => {
                        pending.document.merge_fields_from(doc);
                        pending.merged_count += 1;
                    }
                    _ => {
                        merged.extend(open.take());
                        open = Some(MergedDocument {
                            position,
                            document: doc.clone(),
                            merged_count: 1,
                        });
                    }
                }
            }
            merged.extend(open);
        }
        merged.extend(positions.keyless().iter().filter_map(|&position| {
            batch.get(position).map(|doc| MergedDocument {
                position,
                document: doc.clone(),
                merged_count: 1,
            })
        }));
        merged.sort_by_key(|m| m.position);
        log::debug!(
            "document merger: {} operations -> {} effective documents",
            batch.len(),
            merged.len()
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use strata_attribute::AttrValue;
    use strata_format::{FieldConfig, FieldType};

    use super::*;

    fn schema() -> Schema {
        Schema {
            fields: vec![
                FieldConfig::new(0, "pk", FieldType::String),
                FieldConfig::new(1, "f1", FieldType::String).updatable(),
                FieldConfig::new(2, "f2", FieldType::Int32).updatable(),
            ],
            primary_key: Some("pk".into()),
            ..Default::default()
        }
    }

    fn ops(merged: &[MergedDocument]) -> Vec<(usize, DocOperation)> {
        merged
            .iter()
            .map(|m| (m.position, m.document.operation()))
            .collect()
    }

    #[test]
    fn test_add_absorbs_updates() {
        let batch = [
            Document::add().with_field("pk", "A").with_field("f1", "a"),
            Document::update().with_field("pk", "A").with_field("f1", "x"),
            Document::update().with_field("pk", "A").with_field("f1", "y"),
        ]
        .into_iter()
        .collect::<DocumentBatch>();
        let merged = DocumentMerger::new(Arc::new(schema())).merge(&batch).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].document.operation(), DocOperation::Add);
        assert_eq!(merged[0].document.field("f1"), Some(&AttrValue::from("y")));
        assert_eq!(merged[0].merged_count, 3);
    }

    #[test]
    fn test_updates_merge_field_by_field() {
        let batch = [
            Document::update().with_field("pk", "B").with_field("f1", "x"),
            Document::update().with_field("pk", "B").with_field("f2", 5i32),
            Document::update().with_field("pk", "B").with_field("f1", "z"),
        ]
        .into_iter()
        .collect::<DocumentBatch>();
        let merged = DocumentMerger::new(Arc::new(schema())).merge(&batch).unwrap();
        assert_eq!(ops(&merged), vec![(0, DocOperation::UpdateField)]);
        let doc = &merged[0].document;
        assert_eq!(doc.field("f1"), Some(&AttrValue::from("z")));
        assert_eq!(doc.field("f2"), Some(&AttrValue::from(5i32)));
    }

    #[test]
    fn test_type_switch_flushes_pending_group() {
        let batch = [
            Document::update().with_field("pk", "A").with_field("f1", "x"),
            Document::add().with_field("pk", "B"),
            Document::update().with_field("pk", "A").with_field("f1", "y"),
            Document::delete().with_field("pk", "A"),
            Document::update().with_field("pk", "A").with_field("f1", "z"),
            Document::add().with_field("pk", "A"),
            Document::update().with_field("pk", "B").with_field("f2", 1i32),
        ]
        .into_iter()
        .collect::<DocumentBatch>();
        let merged = DocumentMerger::new(Arc::new(schema())).merge(&batch).unwrap();
        assert_eq!(
            ops(&merged),
            vec![
                (0, DocOperation::UpdateField),
                (1, DocOperation::Add),
                (3, DocOperation::Delete),
                (4, DocOperation::UpdateField),
                (5, DocOperation::Add),
            ]
        );
        assert_eq!(merged[0].document.field("f1"), Some(&AttrValue::from("y")));
        assert_eq!(merged[1].document.field("f2"), Some(&AttrValue::from(1i32)));
    }

    #[test]
    fn test_sub_documents_disable_merging() {
        let schema = Schema {
            has_sub_documents: true,
            ..schema()
        };
        let batch = [
            Document::add().with_field("pk", "A"),
            Document::update().with_field("pk", "A").with_field("f1", "x"),
        ]
        .into_iter()
        .collect::<DocumentBatch>();
        let merger = DocumentMerger::new(Arc::new(schema));
        assert!(!merger.is_enabled());
        assert_eq!(merger.merge(&batch).unwrap().len(), 2);
    }
}
