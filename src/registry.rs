//! Field mapping registry: canonical fields, their categories and value types,
//! and the historical column names that map onto them.
//!
//! The registry is loaded once from a YAML mapping file and is immutable
//! afterwards; every component receives it by reference. Loading also builds
//! the [`ReverseIndex`] (variant name → canonical field), which records rather
//! than overwrites variants claimed by more than one canonical field.
//!
//! ```yaml
//! version: "2024.2"
//! table_patterns: ["legislative.*monitoring"]
//! categories:
//!   - category: status
//!     fields:
//!       - name: enacted
//!         datatype: boolean
//!         variants: ["Enacted", "Date Enacted"]
//! ```

use std::{collections::HashMap, fmt, fs, path::Path, str::FromStr};

use anyhow::anyhow;
use log::{debug, warn};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sha2::{Digest, Sha256};

use crate::{
    data::{Value, normalize_header},
    error::RegistryError,
};

pub const YEAR_COLUMN: &str = "year";
pub const INGESTION_COLUMN: &str = "ingestion_date";
pub const SOURCE_LABEL_COLUMN: &str = "source_label";

const METADATA_COLUMNS: &[(&str, ValueType)] = &[
    (YEAR_COLUMN, ValueType::Integer),
    (INGESTION_COLUMN, ValueType::DateTime),
    (SOURCE_LABEL_COLUMN, ValueType::String),
];

pub const DEFAULT_TABLE_PATTERNS: &[&str] = &[
    r"legislative.*monitoring",
    r"monitoring.*table",
    r"state.*legislative.*table",
    r"legislative",
    r"bills",
    r"maindata",
];

/// Semantic class of a canonical field. Governs what an untracked field looks
/// like after harmonization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Identifier,
    Status,
    PolicyCategory,
    Intent,
    Date,
    FreeText,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Identifier,
        Category::Status,
        Category::PolicyCategory,
        Category::Intent,
        Category::Date,
        Category::FreeText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Identifier => "identifier",
            Category::Status => "status",
            Category::PolicyCategory => "policy_category",
            Category::Intent => "intent",
            Category::Date => "date",
            Category::FreeText => "free_text",
        }
    }

    /// Value a field of this category takes when the source year has no
    /// column for it: `false` for status, null for everything else.
    pub fn untracked_default(&self) -> Option<Value> {
        match self {
            Category::Status => Some(Value::Boolean(false)),
            Category::PolicyCategory
            | Category::Intent
            | Category::Date
            | Category::FreeText
            | Category::Identifier => None,
        }
    }

    pub fn default_value_type(&self) -> ValueType {
        match self {
            Category::Status | Category::PolicyCategory | Category::Intent => ValueType::Boolean,
            Category::Date => ValueType::Date,
            Category::Identifier | Category::FreeText => ValueType::String,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Integer,
    Boolean,
    Date,
    DateTime,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::Date => "date",
            ValueType::DateTime => "datetime",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["string", "integer", "boolean", "date", "datetime"]
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "string" | "text" => Ok(ValueType::String),
            "integer" | "int" | "int64" => Ok(ValueType::Integer),
            "boolean" | "bool" => Ok(ValueType::Boolean),
            "date" => Ok(ValueType::Date),
            "datetime" | "timestamp" => Ok(ValueType::DateTime),
            _ => Err(anyhow!(
                "Unknown value type '{value}'. Supported types: {}",
                ValueType::variants().join(", ")
            )),
        }
    }
}

impl Serialize for ValueType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ValueType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub table_patterns: Vec<String>,
    pub categories: Vec<CategoryGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub category: Category,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<ValueType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub category: Category,
    pub value_type: ValueType,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Canonical(Category),
    Metadata,
    Unregistered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub value_type: ValueType,
    pub role: ColumnRole,
}

/// A variant string claimed by two canonical fields. The first claim wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ambiguity {
    pub variant: String,
    pub kept: String,
    pub ignored: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Mapped(usize),
    Unmapped,
}

#[derive(Debug, Clone, Default)]
pub struct ReverseIndex {
    lookup: HashMap<String, usize>,
    ambiguities: Vec<Ambiguity>,
}

impl ReverseIndex {
    /// Inverts `fields` into a variant → field lookup. Explicit variants are
    /// registered before the canonical name itself, field by field, in
    /// registry order. Keys are compared case-insensitively.
    pub fn build(fields: &[FieldDescriptor]) -> Self {
        let mut index = ReverseIndex::default();
        for (position, field) in fields.iter().enumerate() {
            for variant in field.variants.iter().chain(std::iter::once(&field.name)) {
                index.claim(variant, position, fields);
            }
        }
        index
    }

    fn claim(&mut self, variant: &str, position: usize, fields: &[FieldDescriptor]) {
        let key = normalize_header(variant);
        if key.is_empty() {
            return;
        }
        match self.lookup.get(&key) {
            None => {
                self.lookup.insert(key, position);
            }
            Some(&existing) if existing == position => {}
            Some(&existing) => {
                let ambiguity = Ambiguity {
                    variant: variant.to_string(),
                    kept: fields[existing].name.clone(),
                    ignored: fields[position].name.clone(),
                };
                warn!(
                    "Variant '{}' is claimed by both '{}' and '{}'; keeping '{}'",
                    ambiguity.variant, ambiguity.kept, ambiguity.ignored, ambiguity.kept
                );
                self.ambiguities.push(ambiguity);
            }
        }
    }

    pub fn resolve(&self, header: &str) -> Resolution {
        match self.lookup.get(&normalize_header(header)) {
            Some(&position) => Resolution::Mapped(position),
            None => Resolution::Unmapped,
        }
    }

    pub fn ambiguities(&self) -> &[Ambiguity] {
        &self.ambiguities
    }

    pub fn has_ambiguities(&self) -> bool {
        !self.ambiguities.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lookup.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Registry {
    version: Option<String>,
    fingerprint: String,
    fields: Vec<FieldDescriptor>,
    table_patterns: Vec<Regex>,
    reverse: ReverseIndex,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let raw = fs::read(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: MappingConfig = serde_yaml::from_slice(&raw)?;
        let registry = Self::build(config, fingerprint_bytes(&raw))?;
        debug!(
            "Loaded {} canonical field(s) from {:?} (fingerprint {})",
            registry.fields.len(),
            path,
            registry.short_fingerprint()
        );
        Ok(registry)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, RegistryError> {
        let config: MappingConfig = serde_yaml::from_str(input)?;
        Self::build(config, fingerprint_bytes(input.as_bytes()))
    }

    pub fn from_config(config: MappingConfig) -> Result<Self, RegistryError> {
        let serialized = serde_yaml::to_string(&config)?;
        Self::build(config, fingerprint_bytes(serialized.as_bytes()))
    }

    fn build(config: MappingConfig, fingerprint: String) -> Result<Self, RegistryError> {
        let mut fields: Vec<FieldDescriptor> = Vec::new();
        for group in config.categories {
            for (position, field) in group.fields.into_iter().enumerate() {
                let name = field.name.trim().to_string();
                if name.is_empty() {
                    return Err(RegistryError::EmptyName {
                        category: group.category.to_string(),
                        position: position + 1,
                    });
                }
                if METADATA_COLUMNS.iter().any(|(reserved, _)| *reserved == name) {
                    return Err(RegistryError::ReservedName { name });
                }
                if fields.iter().any(|existing| existing.name == name) {
                    return Err(RegistryError::DuplicateField { name });
                }
                let value_type = field
                    .datatype
                    .unwrap_or_else(|| group.category.default_value_type());
                if group.category == Category::Status && value_type != ValueType::Boolean {
                    return Err(RegistryError::StatusNotBoolean {
                        name,
                        datatype: value_type.to_string(),
                    });
                }
                fields.push(FieldDescriptor {
                    name,
                    category: group.category,
                    value_type,
                    variants: field.variants,
                });
            }
        }

        let pattern_sources: Vec<String> = if config.table_patterns.is_empty() {
            DEFAULT_TABLE_PATTERNS.iter().map(|p| p.to_string()).collect()
        } else {
            config.table_patterns
        };
        let table_patterns = pattern_sources
            .into_iter()
            .map(|pattern| {
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| RegistryError::InvalidPattern { pattern, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let reverse = ReverseIndex::build(&fields);
        Ok(Registry {
            version: config.version,
            fingerprint,
            fields,
            table_patterns,
            reverse,
        })
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn short_fingerprint(&self) -> &str {
        &self.fingerprint[..12.min(self.fingerprint.len())]
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn fields_in(&self, category: Category) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(move |field| field.category == category)
    }

    pub fn reverse_index(&self) -> &ReverseIndex {
        &self.reverse
    }

    pub fn table_patterns(&self) -> &[Regex] {
        &self.table_patterns
    }

    /// The reference column order: canonical fields in registry order, then the
    /// metadata columns.
    pub fn columns(&self) -> Vec<ColumnSpec> {
        self.fields
            .iter()
            .map(|field| ColumnSpec {
                name: field.name.clone(),
                value_type: field.value_type,
                role: ColumnRole::Canonical(field.category),
            })
            .chain(METADATA_COLUMNS.iter().map(|(name, ty)| ColumnSpec {
                name: (*name).to_string(),
                value_type: *ty,
                role: ColumnRole::Metadata,
            }))
            .collect()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns().into_iter().map(|c| c.name).collect()
    }
}

fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
