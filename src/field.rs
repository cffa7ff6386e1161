use crate::error::{QueryError, Result};
use crate::registry::PropertyRegistry;
use std::fmt;

/// Row alias of the entity table in every generated statement
pub const TABLE_ALIAS: &str = "t";

/// Pseudo-field matching entities that reference a given value
pub const REVERSE_FIELD: &str = "reverse";

/// Meta field matched against the entity's dataset list
pub const DATASET_FIELD: &str = "dataset";

const CONTEXT_PREFIX: &str = "context.";
const ARRAY_SUFFIX: &str = "[]";
const OPERATOR_SEPARATOR: &str = "__";

/// Classification of a requested field name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Column of the entity table (`id`, `schema`, ...)
    Meta,
    /// Model property, stored as an array under `$.properties`
    Property,
    /// Scalar extra field under the entity root (`context.foo`)
    Context,
    /// Array-valued extra field (`foo[]`, `context.foo[]`)
    ArrayProperty,
    /// `reverse` pseudo-field, matched against all property values.
    ///
    /// The cross join yields one row per matching property, so an entity
    /// referencing the value from two properties is returned (and counted)
    /// twice.
    Reverse,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Meta => write!(f, "meta"),
            FieldKind::Property => write!(f, "property"),
            FieldKind::Context => write!(f, "context"),
            FieldKind::ArrayProperty => write!(f, "array"),
            FieldKind::Reverse => write!(f, "reverse"),
        }
    }
}

/// A field name resolved against the property registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub name: String,
    pub kind: FieldKind,
    /// `json_extract(...)` expression, `None` for columns
    pub json_expr: Option<String>,
    /// Column reference or select alias
    pub alias: String,
    pub numeric: bool,
}

impl ResolvedField {
    /// Whether lookups go through `json_each` over the field values
    pub fn is_multivalued(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Property | FieldKind::ArrayProperty | FieldKind::Reverse
        )
    }

    /// Expression used in ORDER BY.
    ///
    /// Columns are qualified with the row alias when `joined`, since the
    /// full-text index and `json_each` sources carry an `id` column too.
    pub fn order_expr(&self, joined: bool) -> Result<String> {
        match self.kind {
            FieldKind::Meta if joined => Ok(self.alias.clone()),
            FieldKind::Meta => Ok(self.name.clone()),
            FieldKind::Property if self.numeric => Ok(format!(
                "CAST(json_extract({}, '$[0]') AS NUMERIC)",
                self.alias
            )),
            FieldKind::Property | FieldKind::Context | FieldKind::ArrayProperty => {
                Ok(self.alias.clone())
            }
            FieldKind::Reverse => Err(QueryError::InvalidField(self.name.clone())),
        }
    }
}

/// Resolves field names into column references and JSON extractions
#[derive(Debug, Clone, Copy)]
pub struct FieldResolver<'a> {
    registry: &'a dyn PropertyRegistry,
}

impl<'a> FieldResolver<'a> {
    pub fn new(registry: &'a dyn PropertyRegistry) -> Self {
        Self { registry }
    }

    /// Resolve a field, ignoring a trailing `__operator` suffix
    pub fn resolve(&self, field: &str) -> Result<ResolvedField> {
        let name = base_field(field);

        if name.is_empty() {
            return Err(QueryError::InvalidField(field.to_string()));
        }

        if name == REVERSE_FIELD {
            return Ok(ResolvedField {
                name: name.to_string(),
                kind: FieldKind::Reverse,
                json_expr: None,
                alias: "r.value".to_string(),
                numeric: false,
            });
        }

        let is_context = name.starts_with(CONTEXT_PREFIX);
        let is_array = name.ends_with(ARRAY_SUFFIX);

        if !is_context && !is_array {
            // the `dataset` column holds one dataset only
            if name == DATASET_FIELD && self.registry.is_meta_field(name) {
                return Ok(ResolvedField {
                    name: name.to_string(),
                    kind: FieldKind::ArrayProperty,
                    json_expr: Some(json_extract("datasets")),
                    alias: "datasets".to_string(),
                    numeric: false,
                });
            }
            if self.registry.is_meta_field(name) {
                return Ok(ResolvedField {
                    name: name.to_string(),
                    kind: FieldKind::Meta,
                    json_expr: None,
                    alias: format!("{}.{}", TABLE_ALIAS, name),
                    numeric: false,
                });
            }
            if self.registry.is_known_property(name) {
                return Ok(ResolvedField {
                    name: name.to_string(),
                    kind: FieldKind::Property,
                    json_expr: Some(json_extract(&format!("properties.{}", name))),
                    alias: slugify(name),
                    numeric: self.registry.is_numeric(name),
                });
            }
            return Err(QueryError::InvalidField(field.to_string()));
        }

        let path = name.strip_prefix(CONTEXT_PREFIX).unwrap_or(name);
        let path = path.strip_suffix(ARRAY_SUFFIX).unwrap_or(path);
        if !is_json_path(path) {
            return Err(QueryError::InvalidField(field.to_string()));
        }

        Ok(ResolvedField {
            name: name.to_string(),
            kind: if is_array {
                FieldKind::ArrayProperty
            } else {
                FieldKind::Context
            },
            json_expr: Some(json_extract(path)),
            alias: slugify(name),
            numeric: false,
        })
    }
}

/// Field name without its `__operator` suffix
pub fn base_field(field: &str) -> &str {
    field
        .split_once(OPERATOR_SEPARATOR)
        .map(|(base, _)| base)
        .unwrap_or(field)
}

/// Split `field__op` into base field and optional operator token
pub fn split_operator(field: &str) -> (&str, Option<&str>) {
    match field.split_once(OPERATOR_SEPARATOR) {
        Some((base, op)) => (base, Some(op)),
        None => (field, None),
    }
}

/// Replace runs of non-alphanumeric characters with a single `_`
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending && !slug.is_empty() {
                slug.push('_');
            }
            pending = false;
            slug.push(c);
        } else {
            pending = true;
        }
    }

    slug
}

fn json_extract(path: &str) -> String {
    format!("json_extract({}.entity, '$.{}')", TABLE_ALIAS, path)
}

// Paths are inlined into SQL text, so only plain dotted identifiers pass.
fn is_json_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ModelRegistry, PropertyType};

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with_property("name", PropertyType::Name)
            .with_property("amount", PropertyType::Number)
    }

    #[test]
    fn test_resolve_meta() {
        let registry = registry();
        let field = FieldResolver::new(&registry).resolve("schema").unwrap();

        assert_eq!(field.kind, FieldKind::Meta);
        assert_eq!(field.json_expr, None);
        assert_eq!(field.alias, "t.schema");
        assert_eq!(field.order_expr(false).unwrap(), "schema");
        assert_eq!(field.order_expr(true).unwrap(), "t.schema");
    }

    #[test]
    fn test_resolve_dataset() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry);

        let field = resolver.resolve("dataset").unwrap();
        assert_eq!(field.kind, FieldKind::ArrayProperty);
        assert_eq!(field.json_expr.as_deref(), Some("json_extract(t.entity, '$.datasets')"));
        assert_eq!(field.alias, "datasets");
        assert!(field.is_multivalued());

        let registry = ModelRegistry::from_json_str(r#"{"meta": ["id", "schema"]}"#).unwrap();
        assert!(FieldResolver::new(&registry).resolve("dataset").is_err());
    }

    #[test]
    fn test_resolve_property() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry);

        let field = resolver.resolve("name__like").unwrap();
        assert_eq!(field.kind, FieldKind::Property);
        assert_eq!(
            field.json_expr.as_deref(),
            Some("json_extract(t.entity, '$.properties.name')")
        );
        assert_eq!(field.alias, "name");
        assert!(!field.numeric);
        assert_eq!(field.order_expr(false).unwrap(), "name");
        assert_eq!(field.order_expr(true).unwrap(), "name");

        let field = resolver.resolve("amount").unwrap();
        assert!(field.numeric);
        assert_eq!(
            field.order_expr(false).unwrap(),
            "CAST(json_extract(amount, '$[0]') AS NUMERIC)"
        );
    }

    #[test]
    fn test_resolve_context() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry);

        let field = resolver.resolve("context.scope").unwrap();
        assert_eq!(field.kind, FieldKind::Context);
        assert_eq!(field.json_expr.as_deref(), Some("json_extract(t.entity, '$.scope')"));
        assert_eq!(field.alias, "context_scope");
        assert!(!field.is_multivalued());

        let field = resolver.resolve("context.listish[]").unwrap();
        assert_eq!(field.kind, FieldKind::ArrayProperty);
        assert_eq!(field.json_expr.as_deref(), Some("json_extract(t.entity, '$.listish')"));
        assert_eq!(field.alias, "context_listish");
        assert!(field.is_multivalued());

        let field = resolver.resolve("datasets[]").unwrap();
        assert_eq!(field.kind, FieldKind::ArrayProperty);
        assert_eq!(field.json_expr.as_deref(), Some("json_extract(t.entity, '$.datasets')"));
        assert_eq!(field.alias, "datasets");
    }

    #[test]
    fn test_resolve_reverse() {
        let registry = registry();
        let field = FieldResolver::new(&registry).resolve("reverse").unwrap();

        assert_eq!(field.kind, FieldKind::Reverse);
        assert_eq!(field.alias, "r.value");
        assert!(field.order_expr(false).is_err());
    }

    #[test]
    fn test_resolve_invalid() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry);

        assert!(matches!(resolver.resolve("invalid_prop"), Err(QueryError::InvalidField(_))));
        assert!(matches!(
            resolver.resolve("invalid_prop__like"),
            Err(QueryError::InvalidField(_))
        ));
        assert!(matches!(resolver.resolve("__eq"), Err(QueryError::InvalidField(_))));
        assert!(matches!(
            resolver.resolve("context.a') OR 1=1 --"),
            Err(QueryError::InvalidField(_))
        ));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("context.foo"), "context_foo");
        assert_eq!(slugify("context.listish[]"), "context_listish");
        assert_eq!(slugify("birthDate"), "birthDate");
        assert_eq!(slugify("a..b"), "a_b");
    }

    #[test]
    fn test_split_operator() {
        assert_eq!(split_operator("amount__gt"), ("amount", Some("gt")));
        assert_eq!(split_operator("amount"), ("amount", None));
        assert_eq!(split_operator("name__invalid__op"), ("name", Some("invalid__op")));
    }
}
