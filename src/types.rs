//! Core type definitions
//!
//! Entity identifiers, attribute values and typed attribute definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Identifiers
// ============================================================================

/// Primary key value of an entity row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Int(i64),
    Str(String),
}

impl Id {
    /// Convert a JSON value into an identifier, if it has an id-like shape
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Id::Int),
            Value::String(s) => Some(Id::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Id::Int(i) => Value::from(*i),
            Id::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Int(i) => write!(f, "{}", i),
            Id::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Int(value)
    }
}

impl From<i32> for Id {
    fn from(value: i32) -> Self {
        Id::Int(value as i64)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Str(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::Str(value)
    }
}

impl From<uuid::Uuid> for Id {
    fn from(value: uuid::Uuid) -> Self {
        Id::Str(value.to_string())
    }
}

/// Column name to value mapping used for writes and decoded rows
pub type Values = serde_json::Map<String, Value>;

// ============================================================================
// Attribute Types
// ============================================================================

/// Storage type of an entity attribute
///
/// Drives value validation on write, parameter binding and row decoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnType {
    /// TEXT
    String,
    /// VARCHAR(length); longer values are rejected before they reach the database
    Varchar { length: u16 },
    /// BIGINT; INTEGER columns decode too
    Integer,
    /// NUMERIC(precision, scale), decoded as a JSON number
    Decimal {
        #[serde(default = "default_precision")]
        precision: u8,
        #[serde(default = "default_scale")]
        scale: u8,
    },
    Boolean,
    /// TIMESTAMPTZ, exchanged as RFC 3339 text
    Timestamp,
    /// JSONB
    Json,
    /// UUID, exchanged as hyphenated text
    Uuid,
    /// TEXT restricted to a fixed set of values
    Enum { values: Vec<String> },
}

fn default_precision() -> u8 {
    19
}

fn default_scale() -> u8 {
    4
}

/// Boolean from its common text spellings
pub(crate) fn parse_flag(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl ColumnType {
    pub fn decimal(precision: u8, scale: u8) -> Self {
        ColumnType::Decimal { precision, scale }
    }

    pub fn varchar(length: u16) -> Self {
        ColumnType::Varchar { length }
    }

    /// PostgreSQL type name, used in messages
    pub fn to_sql_type(&self) -> String {
        match self {
            ColumnType::String | ColumnType::Enum { .. } => "TEXT".into(),
            ColumnType::Varchar { length } => format!("VARCHAR({})", length),
            ColumnType::Integer => "BIGINT".into(),
            ColumnType::Decimal { precision, scale } => format!("NUMERIC({},{})", precision, scale),
            ColumnType::Boolean => "BOOLEAN".into(),
            ColumnType::Timestamp => "TIMESTAMPTZ".into(),
            ColumnType::Json => "JSONB".into(),
            ColumnType::Uuid => "UUID".into(),
        }
    }

    /// Type used to cast text operands for comparison with this column
    ///
    /// Unlike [`ColumnType::to_sql_type`] it carries no length, precision or
    /// scale, so a cast never truncates or rounds the operand.
    pub fn cast_type(&self) -> &'static str {
        match self {
            ColumnType::String | ColumnType::Varchar { .. } | ColumnType::Enum { .. } => "text",
            ColumnType::Integer => "bigint",
            ColumnType::Decimal { .. } => "numeric",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamptz",
            ColumnType::Json => "jsonb",
            ColumnType::Uuid => "uuid",
        }
    }

    /// Check that `value` can be bound to this type
    ///
    /// Null always passes; nullability is checked by [`ColumnDefinition::check`].
    /// Text forms of numbers and flags are accepted since filter parameters
    /// usually arrive as query-string text.
    pub fn validate_value(&self, value: &Value) -> Result<(), String> {
        let accepted = match (self, value) {
            (_, Value::Null) | (ColumnType::Json, _) => true,
            (ColumnType::String, Value::String(_)) => true,
            (ColumnType::Varchar { length }, Value::String(text)) => {
                if text.chars().count() > *length as usize {
                    return Err(format!("Value is longer than {} characters", length));
                }
                true
            }
            (ColumnType::Enum { values }, Value::String(text)) => {
                if !values.contains(text) {
                    return Err(format!("'{}' is not one of {:?}", text, values));
                }
                true
            }
            (ColumnType::Integer, Value::Number(n)) => n.is_i64(),
            (ColumnType::Integer, Value::String(text)) => text.parse::<i64>().is_ok(),
            (ColumnType::Decimal { .. }, Value::Number(_)) => true,
            (ColumnType::Decimal { .. }, Value::String(text)) => {
                text.parse::<rust_decimal::Decimal>().is_ok()
            }
            (ColumnType::Boolean, Value::Bool(_)) => true,
            (ColumnType::Boolean, Value::String(text)) => parse_flag(text).is_some(),
            (ColumnType::Timestamp, Value::String(text)) => {
                chrono::DateTime::parse_from_rfc3339(text)
                    .map_err(|e| format!("Invalid timestamp '{}': {}", text, e))?;
                true
            }
            (ColumnType::Uuid, Value::String(text)) => uuid::Uuid::parse_str(text).is_ok(),
            _ => false,
        };

        if accepted {
            Ok(())
        } else {
            Err(format!("Expected {}, got {}", self.to_sql_type(), value))
        }
    }
}

/// Typed attribute of an entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,

    #[serde(flatten)]
    pub column_type: ColumnType,

    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Filled by the database when omitted on insert
    #[serde(default)]
    pub has_default: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            has_default: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as filled by a database default
    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    /// Check a value against type and nullability
    pub fn check(&self, value: &Value) -> Result<(), String> {
        if value.is_null() && !self.nullable {
            return Err(format!("Attribute '{}' can not be null", self.name));
        }
        self.column_type
            .validate_value(value)
            .map_err(|e| format!("Invalid value for '{}': {}", self.name, e))
    }
}
