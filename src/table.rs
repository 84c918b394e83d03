//! Table Descriptor Builder
//!
//! Turns the caller's ordered column specifications into a [`TableSchema`]
//! plus the [`DesiredValues`] for every column that carries a literal value.

use crate::error::{ReconcileError, Result};
use crate::types::{RawValue, TypeName, TypeRegistry, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One column as supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,

    /// Logical type name, resolved through the type registry
    #[serde(rename = "type")]
    pub type_name: String,

    /// Desired value; absent for select-style columns
    #[serde(default)]
    pub value: Option<RawValue>,
}

impl ColumnSpec {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        value: Option<RawValue>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: TypeName,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column, failing with `UnknownColumn` when it is not part of the schema.
    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| ReconcileError::UnknownColumn {
            table: self.name.clone(),
            column: name.to_string(),
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// `CREATE TABLE IF NOT EXISTS` for this schema. Never alters an existing table.
    pub fn create_table_sql(&self, registry: &TypeRegistry) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                format!(
                    "{} {}",
                    quote_ident(&c.name),
                    registry.info(c.ty).storage.declared_type()
                )
            })
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            columns.join(", ")
        )
    }
}

/// Desired, already coerced values keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredValues(BTreeMap<String, Value>);

impl DesiredValues {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.0.insert(column.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The desired values as a reportable row.
    pub fn to_row(&self) -> BTreeMap<String, Value> {
        self.0.clone()
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Build the table schema and the desired values from the column specs.
pub fn build(
    table: &str,
    specs: &[ColumnSpec],
    registry: &TypeRegistry,
) -> Result<(TableSchema, DesiredValues)> {
    let mut schema = TableSchema {
        name: table.to_string(),
        columns: Vec::with_capacity(specs.len()),
    };
    let mut desired = DesiredValues::default();

    for spec in specs {
        let info = registry.resolve(&spec.name, &spec.type_name)?;

        if schema.column(&spec.name).is_some() {
            return Err(ReconcileError::DuplicateColumn(spec.name.clone()));
        }

        if let Some(raw) = &spec.value {
            let value = info.coerce_for(&spec.name, raw)?;
            desired.insert(spec.name.clone(), value);
        }

        schema.columns.push(Column {
            name: spec.name.clone(),
            ty: info.name,
        });
    }

    debug!(
        "Built descriptor for '{}': {} columns, {} desired values",
        schema.name,
        schema.columns.len(),
        desired.len()
    );

    Ok((schema, desired))
}
