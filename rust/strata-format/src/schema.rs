//! Schema of a partition: attribute fields, packed attributes and document-level options.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use strata_common::{error::Error, ids::AttrId};

/// Value type of an attribute field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
}

impl FieldType {
    /// Size in bytes of one value, `None` for strings.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            FieldType::Int8 | FieldType::UInt8 => Some(1),
            FieldType::Int16 | FieldType::UInt16 => Some(2),
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float => Some(4),
            FieldType::Int64 | FieldType::UInt64 | FieldType::Double => Some(8),
            FieldType::String => None,
        }
    }

    pub fn is_string(self) -> bool {
        self == FieldType::String
    }

    pub fn is_float(self) -> bool {
        matches!(self, FieldType::Float | FieldType::Double)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub id: AttrId,
    pub name: String,
    pub field_type: FieldType,
    pub multi_value: bool,
    pub updatable: bool,
    /// For numeric multi-value fields: every document carries exactly this many values,
    /// stored with a fixed stride and no count header.
    pub fixed_value_count: Option<u32>,
    pub supports_null: bool,
}

impl Default for FieldConfig {
    fn default() -> Self {
        FieldConfig {
            id: 0,
            name: String::new(),
            field_type: FieldType::Int32,
            multi_value: false,
            updatable: false,
            fixed_value_count: None,
            supports_null: false,
        }
    }
}

impl FieldConfig {
    pub fn new(id: AttrId, name: impl Into<String>, field_type: FieldType) -> FieldConfig {
        FieldConfig {
            id,
            name: name.into(),
            field_type,
            ..Default::default()
        }
    }

    pub fn multi_value(mut self) -> Self {
        self.multi_value = true;
        self
    }

    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.supports_null = true;
        self
    }

    pub fn with_fixed_value_count(mut self, count: u32) -> Self {
        self.multi_value = true;
        self.fixed_value_count = Some(count);
        self
    }

    /// Encoded size of every value of this field, or `None` for variable-length fields.
    pub fn fixed_width(&self) -> Option<usize> {
        let elem = self.field_type.fixed_size()?;
        match (self.multi_value, self.fixed_value_count) {
            (false, _) => Some(elem),
            (true, Some(count)) => Some(elem * count as usize),
            (true, None) => None,
        }
    }

    pub fn is_fixed_width(&self) -> bool {
        self.fixed_width().is_some()
    }
}

/// Several fixed-width fields stored together as one record per document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    pub id: AttrId,
    pub name: String,
    /// Names of the member fields, in record order.
    pub sub_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    pub schema_version_id: u32,
    pub fields: Vec<FieldConfig>,
    pub packs: Vec<PackConfig>,
    pub primary_key: Option<String>,
    pub has_sub_documents: bool,
    pub auto_add_to_update: bool,
    pub sort_fields: Vec<SortField>,
}

impl Schema {
    pub fn from_json_str(json: &str) -> strata_common::Result<Schema> {
        let schema: Schema =
            serde_json::from_str(json).map_err(|e| Error::json("schema", e))?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn field(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_id(&self, id: AttrId) -> Option<&FieldConfig> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn pack_by_id(&self, id: AttrId) -> Option<&PackConfig> {
        self.packs.iter().find(|p| p.id == id)
    }

    /// Returns the pack containing the field along with the field's position in it.
    pub fn pack_of(&self, field_name: &str) -> Option<(&PackConfig, usize)> {
        self.packs.iter().find_map(|pack| {
            pack.sub_fields
                .iter()
                .position(|f| f == field_name)
                .map(|pos| (pack, pos))
        })
    }

    pub fn primary_key_field(&self) -> Option<&FieldConfig> {
        self.primary_key.as_deref().and_then(|name| self.field(name))
    }

    /// Fields stored as standalone attributes (not members of a pack).
    pub fn standalone_fields(&self) -> impl Iterator<Item = &FieldConfig> {
        self.fields
            .iter()
            .filter(|f| self.pack_of(&f.name).is_none())
    }

    /// Checks the schema for configuration errors.
    pub fn validate(&self) -> strata_common::Result<()> {
        let mut ids = AHashSet::new();
        let mut names = AHashMap::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(Error::schema_violation("", "field name is empty"));
            }
            if !ids.insert(field.id) {
                return Err(Error::schema_violation(&field.name, "duplicate attribute id"));
            }
            if names.insert(field.name.as_str(), field).is_some() {
                return Err(Error::schema_violation(&field.name, "duplicate field name"));
            }
            if let Some(count) = field.fixed_value_count {
                if !field.multi_value || field.field_type.is_string() {
                    return Err(Error::schema_violation(
                        &field.name,
                        "fixed_value_count requires a numeric multi-value field",
                    ));
                }
                if count == 0 {
                    return Err(Error::schema_violation(
                        &field.name,
                        "fixed_value_count must be positive",
                    ));
                }
            }
            if field.supports_null && field.is_fixed_width() {
                return Err(Error::schema_violation(
                    &field.name,
                    "null values are supported only for variable-length fields",
                ));
            }
        }

        let mut packed = AHashSet::new();
        for pack in &self.packs {
            if !ids.insert(pack.id) {
                return Err(Error::schema_violation(&pack.name, "duplicate attribute id"));
            }
            if names.contains_key(pack.name.as_str()) {
                return Err(Error::schema_violation(
                    &pack.name,
                    "pack name collides with a field",
                ));
            }
            if pack.sub_fields.is_empty() {
                return Err(Error::schema_violation(&pack.name, "pack has no sub-fields"));
            }
            for sub in &pack.sub_fields {
                let field = names.get(sub.as_str()).ok_or_else(|| {
                    Error::schema_violation(sub, format!("unknown sub-field of pack {}", pack.name))
                })?;
                if !field.is_fixed_width() {
                    return Err(Error::schema_violation(
                        sub,
                        "pack sub-fields must be fixed-width",
                    ));
                }
                if !packed.insert(sub.as_str()) {
                    return Err(Error::schema_violation(sub, "field belongs to several packs"));
                }
            }
        }

        if let Some(pk) = &self.primary_key {
            let field = names
                .get(pk.as_str())
                .ok_or_else(|| Error::schema_violation(pk, "unknown primary key field"))?;
            if field.multi_value || field.supports_null {
                return Err(Error::schema_violation(
                    pk,
                    "primary key must be a single non-null value",
                ));
            }
            if packed.contains(pk.as_str()) {
                return Err(Error::schema_violation(pk, "primary key cannot be packed"));
            }
        }

        for sort in &self.sort_fields {
            let field = names
                .get(sort.field.as_str())
                .ok_or_else(|| Error::schema_violation(&sort.field, "unknown sort field"))?;
            if field.multi_value {
                return Err(Error::schema_violation(
                    &sort.field,
                    "sort field must be single-value",
                ));
            }
        }
        Ok(())
    }
}
