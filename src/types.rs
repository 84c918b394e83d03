//! Type Registry
//!
//! Maps a logical column type name to its storage descriptor and to the
//! coercion that turns a raw value (caller input or a value read back from
//! SQLite) into a canonical in-memory [`Value`].

use crate::error::{ReconcileError, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use rusqlite::types::{ToSql, ToSqlOutput};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Raw, not yet coerced value.
pub type RawValue = serde_json::Value;

/// Input format shared by `Date` and `DateTime` literals.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Storage form of a `Date` column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Logical column type. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeName {
    String,
    Integer,
    BigInteger,
    Boolean,
    Date,
    DateTime,
    Text,
}

impl TypeName {
    pub const ALL: [TypeName; 7] = [
        TypeName::String,
        TypeName::Integer,
        TypeName::BigInteger,
        TypeName::Boolean,
        TypeName::Date,
        TypeName::DateTime,
        TypeName::Text,
    ];

    /// Slot of this type in the registry table.
    pub const fn ordinal(self) -> usize {
        match self {
            TypeName::String => 0,
            TypeName::Integer => 1,
            TypeName::BigInteger => 2,
            TypeName::Boolean => 3,
            TypeName::Date => 4,
            TypeName::DateTime => 5,
            TypeName::Text => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeName::String => "String",
            TypeName::Integer => "Integer",
            TypeName::BigInteger => "BigInteger",
            TypeName::Boolean => "Boolean",
            TypeName::Date => "Date",
            TypeName::DateTime => "DateTime",
            TypeName::Text => "Text",
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeName {
    type Err = ();

    /// Case-insensitive, underscores ignored: `big_integer` == `BigInteger`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        TypeName::ALL
            .iter()
            .copied()
            .find(|ty| ty.as_str().to_ascii_lowercase() == normalized)
            .ok_or(())
    }
}

/// How a column is declared and stored in SQLite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Varchar,
    Integer,
    BigInt,
    Boolean,
    Date,
    Timestamp,
    Text,
}

impl StorageType {
    /// Declared column type used in `CREATE TABLE`.
    pub fn declared_type(&self) -> &'static str {
        match self {
            StorageType::Varchar => "VARCHAR",
            StorageType::Integer => "INTEGER",
            StorageType::BigInt => "BIGINT",
            StorageType::Boolean => "BOOLEAN",
            StorageType::Date => "DATE",
            StorageType::Timestamp => "DATETIME",
            StorageType::Text => "TEXT",
        }
    }
}

/// Canonical, typed value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual rendering, used to build LIKE patterns from non-text values.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
            Value::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Boolean(b) => ToSqlOutput::from(i64::from(*b)),
            Value::Date(d) => ToSqlOutput::from(d.format(DATE_FORMAT).to_string()),
            Value::DateTime(dt) => ToSqlOutput::from(dt.format(DATETIME_FORMAT).to_string()),
        })
    }
}

/// Coercion from a raw value; the error is a human-readable reason.
pub type CoerceFn = fn(&RawValue) -> std::result::Result<Value, String>;

/// Registry entry for one logical type.
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    pub name: TypeName,
    pub storage: StorageType,
    pub coerce: CoerceFn,
}

impl TypeInfo {
    /// Coerce `raw` for `column`, reporting failures as `InvalidValue`.
    pub fn coerce_for(&self, column: &str, raw: &RawValue) -> Result<Value> {
        (self.coerce)(raw).map_err(|reason| ReconcileError::InvalidValue {
            column: column.to_string(),
            type_name: self.name.to_string(),
            reason,
        })
    }
}

/// Immutable table of the supported types. Build once and pass by reference.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    entries: [TypeInfo; 7],
}

impl TypeRegistry {
    pub fn standard() -> Self {
        Self {
            entries: [
                entry(TypeName::String, StorageType::Varchar, coerce_text),
                entry(TypeName::Integer, StorageType::Integer, coerce_integer),
                entry(TypeName::BigInteger, StorageType::BigInt, coerce_integer),
                entry(TypeName::Boolean, StorageType::Boolean, coerce_boolean),
                entry(TypeName::Date, StorageType::Date, coerce_date),
                entry(TypeName::DateTime, StorageType::Timestamp, coerce_datetime),
                entry(TypeName::Text, StorageType::Text, coerce_text),
            ],
        }
    }

    /// Resolve a type name given by the caller for `column`.
    pub fn resolve(&self, column: &str, type_name: &str) -> Result<&TypeInfo> {
        let ty = type_name
            .parse::<TypeName>()
            .map_err(|_| ReconcileError::UnknownType {
                column: column.to_string(),
                type_name: type_name.to_string(),
            })?;
        Ok(self.info(ty))
    }

    pub fn info(&self, ty: TypeName) -> &TypeInfo {
        &self.entries[ty.ordinal()]
    }
}

const fn entry(name: TypeName, storage: StorageType, coerce: CoerceFn) -> TypeInfo {
    TypeInfo { name, storage, coerce }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn coerce_text(raw: &RawValue) -> std::result::Result<Value, String> {
    match raw {
        RawValue::String(s) => Ok(Value::Text(s.clone())),
        RawValue::Number(n) => Ok(Value::Text(n.to_string())),
        RawValue::Bool(b) => Ok(Value::Text(b.to_string())),
        RawValue::Null => Ok(Value::Null),
        other => Err(format!("cannot convert {} to text", other)),
    }
}

fn coerce_integer(raw: &RawValue) -> std::result::Result<Value, String> {
    match raw {
        RawValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Value::Integer(i));
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::Integer(f as i64))
                }
                _ => Err(format!("'{}' is not an integer", n)),
            }
        }
        RawValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| format!("'{}' is not an integer", s)),
        RawValue::Bool(b) => Ok(Value::Integer(i64::from(*b))),
        RawValue::Null => Ok(Value::Null),
        other => Err(format!("'{}' is not an integer", other)),
    }
}

fn coerce_boolean(raw: &RawValue) -> std::result::Result<Value, String> {
    match raw {
        RawValue::Bool(b) => Ok(Value::Boolean(*b)),
        RawValue::Number(n) => Ok(Value::Boolean(n.as_f64().map(|f| f != 0.0).unwrap_or(true))),
        RawValue::String(s) => {
            let falsy = matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "" | "0" | "false" | "no" | "off"
            );
            Ok(Value::Boolean(!falsy))
        }
        RawValue::Array(items) => Ok(Value::Boolean(!items.is_empty())),
        RawValue::Object(map) => Ok(Value::Boolean(!map.is_empty())),
        RawValue::Null => Ok(Value::Null),
    }
}

fn is_now(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("now")
}

fn coerce_date(raw: &RawValue) -> std::result::Result<Value, String> {
    let s = match raw {
        RawValue::String(s) => s,
        RawValue::Null => return Ok(Value::Null),
        other => return Err(format!("expected a date string, got {}", other)),
    };
    if is_now(s) {
        return Ok(Value::Date(Local::now().date_naive()));
    }

    let trimmed = s.trim();
    NaiveDateTime::parse_from_str(trimmed, DATETIME_FORMAT)
        .map(|dt| dt.date())
        .or_else(|_| NaiveDate::parse_from_str(trimmed, DATE_FORMAT))
        .map(Value::Date)
        .map_err(|e| format!("'{}' does not match '{}': {}", s, DATETIME_FORMAT, e))
}

fn coerce_datetime(raw: &RawValue) -> std::result::Result<Value, String> {
    let s = match raw {
        RawValue::String(s) => s,
        RawValue::Null => return Ok(Value::Null),
        other => return Err(format!("expected a datetime string, got {}", other)),
    };
    if is_now(s) {
        let now = Local::now().naive_local();
        // storage keeps whole seconds only
        let now = now.with_nanosecond(0).unwrap_or(now);
        return Ok(Value::DateTime(now));
    }

    NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT)
        .map(Value::DateTime)
        .map_err(|e| format!("'{}' does not match '{}': {}", s, DATETIME_FORMAT, e))
}
