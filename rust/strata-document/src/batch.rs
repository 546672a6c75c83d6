use ahash::AHashMap;
use strata_common::{Result, error::Error};
use strata_format::Schema;

use crate::document::{DocOperation, Document, PrimaryKey};

/// Documents of one build call, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct DocumentBatch {
    documents: Vec<Document>,
}

impl DocumentBatch {
    pub fn new() -> DocumentBatch {
        Default::default()
    }

    pub fn push(&mut self, document: Document) {
        self.documents.push(document);
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn get(&self, position: usize) -> Option<&Document> {
        self.documents.get(position)
    }

    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }

    /// Groups the batch positions by primary key. Updates and deletes must carry a
    /// primary key; adds without one are rejected when the schema defines a key.
    pub fn primary_key_positions(&self, schema: &Schema) -> Result<PrimaryKeyPositions> {
        let mut groups = AHashMap::<PrimaryKey, Vec<usize>>::new();
        let mut order = Vec::new();
        let mut keyless = Vec::new();
        for (position, doc) in self.documents.iter().enumerate() {
            match doc.primary_key(schema) {
                Some(key) => {
                    let positions = groups.entry(key.clone()).or_default();
                    if positions.is_empty() {
                        order.push(key);
                    }
                    positions.push(position);
                }
                None if schema.primary_key.is_some() => {
                    return Err(Error::invalid_arg(
                        "document",
                        format!(
                            "{:?} at position {position} has no primary key value",
                            doc.operation()
                        ),
                    ));
                }
                None if doc.operation() != DocOperation::Add => {
                    return Err(Error::invalid_arg(
                        "document",
                        format!(
                            "{:?} at position {position} needs a primary key, but the schema has none",
                            doc.operation()
                        ),
                    ));
                }
                None => keyless.push(position),
            }
        }
        Ok(PrimaryKeyPositions {
            groups,
            order,
            keyless,
        })
    }
}

impl FromIterator<Document> for DocumentBatch {
    fn from_iter<I: IntoIterator<Item = Document>>(iter: I) -> Self {
        DocumentBatch {
            documents: iter.into_iter().collect(),
        }
    }
}

/// Batch positions of every primary key, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct PrimaryKeyPositions {
    groups: AHashMap<PrimaryKey, Vec<usize>>,
    /// Keys in order of their first occurrence.
    order: Vec<PrimaryKey>,
    keyless: Vec<usize>,
}

impl PrimaryKeyPositions {
    pub fn positions(&self, key: &PrimaryKey) -> Option<&[usize]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    /// `(key, positions)` for every key, in order of first occurrence.
    pub fn iter(&self) -> impl Iterator<Item = (&PrimaryKey, &[usize])> {
        self.order
            .iter()
            .filter_map(|key| self.groups.get(key).map(|p| (key, p.as_slice())))
    }

    pub fn key_count(&self) -> usize {
        self.order.len()
    }

    /// Positions of documents without a primary key (only when the schema has none).
    pub fn keyless(&self) -> &[usize] {
        &self.keyless
    }
}
