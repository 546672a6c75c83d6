use std::collections::BTreeMap;

use strata_attribute::{AttrValue, Scalar};
use strata_format::{Locator, Schema};

/// What a document asks the partition to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocOperation {
    /// Insert a full document, replacing any live document with the same primary key.
    Add,
    /// Overwrite the given fields of the live document with the same primary key.
    UpdateField,
    /// Delete the live document with the same primary key.
    Delete,
}

/// Canonical form of a primary key value.
///
/// Integer keys are compared by value regardless of their width, so a key written
/// as `Int32(7)` and read back from a `UInt64` attribute are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimaryKey {
    Int(i128),
    Str(String),
}

impl PrimaryKey {
    /// Primary key of an attribute value; `None` for nulls, floats and multi-values.
    pub fn from_value(value: &AttrValue) -> Option<PrimaryKey> {
        match value {
            AttrValue::String(s) => Some(PrimaryKey::Str(s.clone())),
            AttrValue::Scalar(Scalar::UInt64(v)) => Some(PrimaryKey::Int(*v as i128)),
            AttrValue::Scalar(s) => s.as_i64().map(|v| PrimaryKey::Int(v as i128)),
            _ => None,
        }
    }
}

impl std::fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimaryKey::Int(v) => write!(f, "{v}"),
            PrimaryKey::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PrimaryKey {
    fn from(s: &str) -> PrimaryKey {
        PrimaryKey::Str(s.to_string())
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> PrimaryKey {
        PrimaryKey::Int(v as i128)
    }
}

/// One operation of a build batch: the operation type and the field values it
/// carries, keyed by field name.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    operation: DocOperation,
    fields: BTreeMap<String, AttrValue>,
    locator: Locator,
    timestamp: i64,
}

impl Document {
    pub fn new(operation: DocOperation) -> Document {
        Document {
            operation,
            fields: BTreeMap::new(),
            locator: Locator::default(),
            timestamp: 0,
        }
    }

    pub fn add() -> Document {
        Document::new(DocOperation::Add)
    }

    pub fn update() -> Document {
        Document::new(DocOperation::UpdateField)
    }

    pub fn delete() -> Document {
        Document::new(DocOperation::Delete)
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn with_locator(mut self, locator: Locator, timestamp: i64) -> Self {
        self.locator = locator;
        self.timestamp = timestamp;
        self
    }

    pub fn operation(&self) -> DocOperation {
        self.operation
    }

    pub fn set_operation(&mut self, operation: DocOperation) {
        self.operation = operation;
    }

    /// Sets a field, replacing any previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn field(&self, name: &str) -> Option<&AttrValue> {
        self.fields.get(name)
    }

    pub fn remove_field(&mut self, name: &str) -> Option<AttrValue> {
        self.fields.remove(name)
    }

    /// Fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn locator(&self) -> Locator {
        self.locator
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Primary key of the document under `schema`; `None` if the schema has no primary
    /// key or the document does not carry a usable value for it.
    pub fn primary_key(&self, schema: &Schema) -> Option<PrimaryKey> {
        let name = schema.primary_key.as_deref()?;
        PrimaryKey::from_value(self.fields.get(name)?)
    }

    /// Overwrites this document's fields with every field of `other`, keeping the
    /// newer locator.
    pub fn merge_fields_from(&mut self, other: &Document) {
        for (name, value) in &other.fields {
            self.fields.insert(name.clone(), value.clone());
        }
        if other.locator >= self.locator {
            self.locator = other.locator;
            self.timestamp = self.timestamp.max(other.timestamp);
        }
    }
}
