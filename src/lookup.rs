use crate::error::{QueryError, Result};
use crate::field::{split_operator, FieldKind, FieldResolver, ResolvedField};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lookup operators accepted as `field__operator`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Like,
    /// Same SQL as `Like`; sqlite's LIKE only folds ASCII case, so
    /// non-ASCII values still match case-sensitively.
    Ilike,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Null,
    Not,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Like => "like",
            Operator::Ilike => "ilike",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::Null => "null",
            Operator::Not => "not",
        }
    }

    fn sql(&self, list: bool) -> &'static str {
        match (self, list) {
            (Operator::Eq, _) => "=",
            (Operator::Like | Operator::Ilike, _) => "LIKE",
            (Operator::Gt, _) => ">",
            (Operator::Gte, _) => ">=",
            (Operator::Lt, _) => "<",
            (Operator::Lte, _) => "<=",
            (Operator::In, _) => "IN",
            (Operator::Not, true) => "NOT IN",
            (Operator::Not, false) => "!=",
            (Operator::Null, _) => "IS",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eq" => Ok(Operator::Eq),
            "like" => Ok(Operator::Like),
            "ilike" => Ok(Operator::Ilike),
            "gt" => Ok(Operator::Gt),
            "gte" => Ok(Operator::Gte),
            "lt" => Ok(Operator::Lt),
            "lte" => Ok(Operator::Lte),
            "in" => Ok(Operator::In),
            "null" => Ok(Operator::Null),
            "not" => Ok(Operator::Not),
            _ => Err(QueryError::InvalidOperator(s.to_string())),
        }
    }
}

/// Right-hand side of a compiled comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// A single `?`
    Placeholder,
    /// `(?, ?, ...)` with the given arity, never zero
    List(usize),
    /// `IS NULL` (`true`) or `IS NOT NULL` (`false`), binds nothing
    Null(bool),
}

/// One compiled filter condition with the values it binds
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: ResolvedField,
    pub op: Operator,
    pub operand: Operand,
    pub values: Vec<Value>,
}

impl Predicate {
    fn subject(&self) -> String {
        match self.field.kind {
            FieldKind::Meta | FieldKind::Context => self.field.alias.clone(),
            _ if self.field.numeric => "CAST(value AS NUMERIC)".to_string(),
            _ => "value".to_string(),
        }
    }

    fn condition(&self) -> String {
        let subject = self.subject();
        match self.operand {
            Operand::Null(true) => format!("{} IS NULL", subject),
            Operand::Null(false) => format!("{} IS NOT NULL", subject),
            Operand::Placeholder => format!("{} {} ?", subject, self.op.sql(false)),
            Operand::List(n) => format!(
                "{} {} ({})",
                subject,
                self.op.sql(true),
                vec!["?"; n].join(", ")
            ),
        }
    }

    /// Render the SQL fragment; placeholders line up with `values`
    pub fn to_sql(&self) -> String {
        if self.field.is_multivalued() {
            format!(
                "EXISTS (SELECT 1 FROM json_each({}) WHERE {})",
                self.field.alias,
                self.condition()
            )
        } else {
            self.condition()
        }
    }

    pub fn placeholder_count(&self) -> usize {
        match self.operand {
            Operand::Placeholder => 1,
            Operand::List(n) => n,
            Operand::Null(_) => 0,
        }
    }
}

/// Compile a `field[__operator]` lookup and its raw value
pub fn compile_lookup(
    resolver: &FieldResolver<'_>,
    key: &str,
    value: &Value,
) -> Result<Predicate> {
    let (_, token) = split_operator(key);
    let field = resolver.resolve(key)?;

    let op = match token {
        Some(token) if token.contains("__") => {
            return Err(QueryError::InvalidOperatorArity(key.to_string()));
        }
        Some(token) => token
            .parse::<Operator>()
            .map_err(|_| QueryError::InvalidOperator(key.to_string()))?,
        None => Operator::Eq,
    };

    if op == Operator::Null {
        let is_null = as_flag(value).ok_or_else(|| {
            QueryError::invalid_value(key, "`null` expects a boolean")
        })?;
        return Ok(Predicate {
            field,
            op,
            operand: Operand::Null(is_null),
            values: Vec::new(),
        });
    }

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(QueryError::invalid_value(key, "empty list"));
            }
            if items.iter().any(|v| !is_scalar(v)) {
                return Err(QueryError::invalid_value(key, "list items must be scalars"));
            }
            let op = match op {
                Operator::Eq | Operator::In => Operator::In,
                Operator::Not => Operator::Not,
                other => {
                    return Err(QueryError::invalid_value(
                        key,
                        format!("`{}` does not accept a list", other),
                    ));
                }
            };
            Ok(Predicate {
                field,
                op,
                operand: Operand::List(items.len()),
                values: items.clone(),
            })
        }
        Value::Null | Value::Object(_) => Err(QueryError::invalid_value(
            key,
            "expected a scalar or a list of scalars",
        )),
        scalar => {
            let operand = if op == Operator::In {
                Operand::List(1)
            } else {
                Operand::Placeholder
            };
            Ok(Predicate {
                field,
                op,
                operand,
                values: vec![scalar.clone()],
            })
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
