use crate::error::{QueryError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Default model shipped with the crate
const BUNDLED_MODEL: &str = include_str!("../data/model.json");

/// Columns addressed directly on the entity table
pub const DEFAULT_META_FIELDS: &[&str] = &["id", "schema", "dataset", "entity"];

/// FollowTheMoney property value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Name,
    String,
    Text,
    Date,
    Number,
    Country,
    Entity,
    Url,
    Email,
    Phone,
    Identifier,
    Address,
    Ip,
    Language,
    Mimetype,
    Checksum,
    Topic,
    Gender,
    Json,
    Html,
    #[serde(other)]
    Other,
}

impl PropertyType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyType::Number)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::Name => "name",
            PropertyType::String => "string",
            PropertyType::Text => "text",
            PropertyType::Date => "date",
            PropertyType::Number => "number",
            PropertyType::Country => "country",
            PropertyType::Entity => "entity",
            PropertyType::Url => "url",
            PropertyType::Email => "email",
            PropertyType::Phone => "phone",
            PropertyType::Identifier => "identifier",
            PropertyType::Address => "address",
            PropertyType::Ip => "ip",
            PropertyType::Language => "language",
            PropertyType::Mimetype => "mimetype",
            PropertyType::Checksum => "checksum",
            PropertyType::Topic => "topic",
            PropertyType::Gender => "gender",
            PropertyType::Json => "json",
            PropertyType::Html => "html",
            PropertyType::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Read-only property metadata consumed by the field resolver.
///
/// Implementations are built once and never mutated afterwards, so a single
/// instance can be shared across threads behind an `Arc`.
pub trait PropertyRegistry: Send + Sync + fmt::Debug {
    /// Whether `name` is a column on the entity table
    fn is_meta_field(&self, name: &str) -> bool;

    /// Whether `name` is a property of the entity model
    fn is_known_property(&self, name: &str) -> bool;

    /// Declared value type of a property
    fn property_type(&self, name: &str) -> Option<PropertyType>;

    fn is_numeric(&self, name: &str) -> bool {
        self.property_type(name)
            .map(|t| t.is_numeric())
            .unwrap_or(false)
    }

    fn is_known_schema(&self, _name: &str) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct ModelDocument {
    #[serde(default)]
    schemata: Vec<String>,
    #[serde(default)]
    properties: BTreeMap<String, PropertyType>,
    #[serde(default)]
    meta: Option<Vec<String>>,
}

/// Property registry backed by a JSON model document
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    meta: BTreeSet<String>,
    schemata: BTreeSet<String>,
    properties: BTreeMap<String, PropertyType>,
}

impl ModelRegistry {
    /// Create an empty registry with the default meta fields
    pub fn new() -> Self {
        Self {
            meta: DEFAULT_META_FIELDS.iter().map(|f| f.to_string()).collect(),
            schemata: BTreeSet::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Registry for the model bundled with the crate
    pub fn bundled() -> Result<Self> {
        Self::from_json_str(BUNDLED_MODEL)
    }

    /// Parse a model document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: ModelDocument = serde_json::from_str(json)?;

        let mut registry = Self::new();
        if let Some(meta) = doc.meta {
            if meta.is_empty() {
                return Err(QueryError::Registry(
                    "model must declare at least one meta field".to_string(),
                ));
            }
            registry.meta = meta.into_iter().collect();
        }
        for name in registry.meta.iter() {
            if doc.properties.contains_key(name) {
                return Err(QueryError::Registry(format!(
                    "`{}` is declared both as meta field and property",
                    name
                )));
            }
        }
        registry.schemata = doc.schemata.into_iter().collect();
        registry.properties = doc.properties;

        tracing::debug!(
            properties = registry.properties.len(),
            schemata = registry.schemata.len(),
            "loaded property registry"
        );
        Ok(registry)
    }

    /// Load a model document from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Add a property
    pub fn with_property(mut self, name: impl Into<String>, property_type: PropertyType) -> Self {
        self.properties.insert(name.into(), property_type);
        self
    }

    /// Add a schema name
    pub fn with_schema(mut self, name: impl Into<String>) -> Self {
        self.schemata.insert(name.into());
        self
    }

    /// Add a meta field
    pub fn with_meta_field(mut self, name: impl Into<String>) -> Self {
        self.meta.insert(name.into());
        self
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, PropertyType)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyRegistry for ModelRegistry {
    fn is_meta_field(&self, name: &str) -> bool {
        self.meta.contains(name)
    }

    fn is_known_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    fn property_type(&self, name: &str) -> Option<PropertyType> {
        self.properties.get(name).copied()
    }

    // An empty schema list means the model does not restrict schemata.
    fn is_known_schema(&self, name: &str) -> bool {
        self.schemata.is_empty() || self.schemata.contains(name)
    }
}
