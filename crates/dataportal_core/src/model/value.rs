//! Column values and their semantic/storage type vocabulary.
//!
//! # Responsibility
//! - Carry one column value between entity accessors and SQL drivers.
//! - Map semantic field value types onto dialect-neutral storage types.
//!
//! # Invariants
//! - `SqlValue::Null` is the only representation of SQL `NULL`.
//! - Conversions into Rust field types never panic; mismatches surface as
//!   `MappingError::ValueConversion`.

use crate::model::MappingError;
use serde::{Deserialize, Serialize};

/// Dialect-neutral column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the textual form of scalar values, `None` for `NULL`.
    ///
    /// Blob values are decoded as lossy UTF-8.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Integer(value) => Some(value.to_string()),
            Self::Real(value) => Some(value.to_string()),
            Self::Text(value) => Some(value.clone()),
            Self::Blob(value) => Some(String::from_utf8_lossy(value).into_owned()),
        }
    }

    /// Renders the value for literal substitution into a SQL template.
    ///
    /// `NULL` renders as an empty string.
    pub fn to_literal(&self) -> String {
        self.to_text().unwrap_or_default()
    }

    /// Character length of text values, used for parameter sizing.
    pub fn text_len(&self) -> Option<usize> {
        match self {
            Self::Text(value) => Some(value.chars().count()),
            _ => None,
        }
    }

    fn type_label(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }
}

/// Semantic type of an entity field as declared by its mapping directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int32,
    Int64,
    Double,
    Text,
    Binary,
    DateTime,
    Guid,
    /// Enum stored by variant name.
    Enum,
    /// Value object that serializes itself into one column.
    SelfSerializing(StorageType),
    /// Nested record; only mapped when declared as a collection field.
    Record,
}

impl ValueType {
    /// Storage type used when binding parameters of this value type.
    pub fn storage_type(self) -> StorageType {
        match self {
            Self::Bool => StorageType::Boolean,
            Self::Int32 => StorageType::Int32,
            Self::Int64 => StorageType::Int64,
            Self::Double => StorageType::Double,
            Self::Text | Self::Enum => StorageType::String,
            Self::Binary => StorageType::Binary,
            Self::DateTime => StorageType::DateTime,
            Self::Guid => StorageType::Guid,
            Self::SelfSerializing(storage) => storage,
            Self::Record => StorageType::Serialized,
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Self::Int32 | Self::Int64)
    }
}

/// Dialect-neutral storage type attached to bound parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    Boolean,
    Int32,
    Int64,
    Double,
    String,
    Binary,
    DateTime,
    Guid,
    /// Generic serialized payload (XML/JSON text in the original schema).
    Serialized,
}

/// Rust field types that convert to and from a single column value.
pub trait ColumnValue: Sized {
    const VALUE_TYPE: ValueType;

    fn to_sql(&self) -> SqlValue;

    /// Converts a non-null column value into the field type.
    fn from_sql(value: SqlValue) -> Result<Self, MappingError>;
}

fn mismatch(expected: &'static str, value: &SqlValue) -> MappingError {
    MappingError::ValueConversion {
        expected,
        found: value.type_label().to_string(),
    }
}

impl ColumnValue for bool {
    const VALUE_TYPE: ValueType = ValueType::Bool;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Integer(i64::from(*self))
    }

    fn from_sql(value: SqlValue) -> Result<Self, MappingError> {
        match &value {
            SqlValue::Integer(number) => Ok(*number != 0),
            SqlValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => Ok(true),
                "0" | "false" => Ok(false),
                _ => Err(mismatch("bool", &value)),
            },
            _ => Err(mismatch("bool", &value)),
        }
    }
}

impl ColumnValue for i32 {
    const VALUE_TYPE: ValueType = ValueType::Int32;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Integer(i64::from(*self))
    }

    fn from_sql(value: SqlValue) -> Result<Self, MappingError> {
        let wide = i64::from_sql(value)?;
        i32::try_from(wide).map_err(|_| MappingError::ValueConversion {
            expected: "i32",
            found: format!("out of range integer {wide}"),
        })
    }
}

impl ColumnValue for i64 {
    const VALUE_TYPE: ValueType = ValueType::Int64;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Integer(*self)
    }

    fn from_sql(value: SqlValue) -> Result<Self, MappingError> {
        match &value {
            SqlValue::Integer(number) => Ok(*number),
            SqlValue::Text(text) => text.trim().parse().map_err(|_| mismatch("i64", &value)),
            _ => Err(mismatch("i64", &value)),
        }
    }
}

impl ColumnValue for f64 {
    const VALUE_TYPE: ValueType = ValueType::Double;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Real(*self)
    }

    fn from_sql(value: SqlValue) -> Result<Self, MappingError> {
        match &value {
            SqlValue::Real(number) => Ok(*number),
            SqlValue::Integer(number) => Ok(*number as f64),
            SqlValue::Text(text) => text.trim().parse().map_err(|_| mismatch("f64", &value)),
            _ => Err(mismatch("f64", &value)),
        }
    }
}

impl ColumnValue for String {
    const VALUE_TYPE: ValueType = ValueType::Text;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }

    fn from_sql(value: SqlValue) -> Result<Self, MappingError> {
        match value {
            SqlValue::Text(text) => Ok(text),
            other => other.to_text().ok_or_else(|| mismatch("text", &other)),
        }
    }
}

impl ColumnValue for Vec<u8> {
    const VALUE_TYPE: ValueType = ValueType::Binary;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Blob(self.clone())
    }

    fn from_sql(value: SqlValue) -> Result<Self, MappingError> {
        match value {
            SqlValue::Blob(bytes) => Ok(bytes),
            SqlValue::Text(text) => Ok(text.into_bytes()),
            other => Err(mismatch("blob", &other)),
        }
    }
}

impl<T: ColumnValue> ColumnValue for Option<T> {
    const VALUE_TYPE: ValueType = T::VALUE_TYPE;

    fn to_sql(&self) -> SqlValue {
        match self {
            Some(value) => value.to_sql(),
            None => SqlValue::Null,
        }
    }

    fn from_sql(value: SqlValue) -> Result<Self, MappingError> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_sql(value).map(Some)
    }
}

/// Enum field stored by variant name and parsed back case-insensitively.
pub trait ColumnEnum: Sized + Copy + 'static {
    /// All variants in declaration order.
    fn variants() -> &'static [Self];

    fn variant_name(&self) -> &'static str;

    /// Parses a stored name (case-insensitive) or a declaration-order index.
    fn parse_variant(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if let Some(found) = Self::variants()
            .iter()
            .find(|variant| variant.variant_name().eq_ignore_ascii_case(trimmed))
        {
            return Some(*found);
        }
        trimmed
            .parse::<usize>()
            .ok()
            .and_then(|index| Self::variants().get(index).copied())
    }
}

/// Value object that converts itself to and from one scalar column.
pub trait ColumnSerialize: Sized {
    /// Storage type of the serialized column.
    fn storage_type() -> StorageType {
        StorageType::Serialized
    }

    fn serialize_column(&self) -> String;

    fn deserialize_column(text: &str) -> Result<Self, MappingError>;
}

/// JSON-backed self-serializing wrapper for any serde value object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T> ColumnSerialize for Json<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    fn serialize_column(&self) -> String {
        // Serializing plain data structures into a string cannot fail.
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    fn deserialize_column(text: &str) -> Result<Self, MappingError> {
        if text.trim().is_empty() {
            return Err(MappingError::ValueConversion {
                expected: "json",
                found: "empty text".to_string(),
            });
        }
        serde_json::from_str(text)
            .map(Json)
            .map_err(|err| MappingError::ValueConversion {
                expected: "json",
                found: err.to_string(),
            })
    }
}
