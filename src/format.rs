//! Row Formatter: raw stored rows back into typed values for reporting.

use crate::db::fetch::RawRow;
use crate::error::Result;
use crate::table::TableSchema;
use crate::types::{TypeRegistry, Value};
use std::collections::BTreeMap;

/// A reportable row, column name to canonical value.
pub type Row = BTreeMap<String, Value>;

/// Normalize every non-null value through its column's coercion.
///
/// Columns the schema does not describe are reported as integers when they
/// hold one, otherwise as text.
pub fn format_rows(
    rows: &[RawRow],
    schema: &TableSchema,
    registry: &TypeRegistry,
) -> Result<Vec<Row>> {
    rows.iter().map(|row| format_row(row, schema, registry)).collect()
}

pub fn format_row(row: &RawRow, schema: &TableSchema, registry: &TypeRegistry) -> Result<Row> {
    let mut out = Row::new();
    for (name, raw) in row {
        let value = if raw.is_null() {
            Value::Null
        } else if let Some(column) = schema.column(name) {
            registry.info(column.ty).coerce_for(name, raw)?
        } else if let Some(i) = raw.as_i64() {
            Value::Integer(i)
        } else {
            Value::Text(raw.as_str().map(str::to_string).unwrap_or_else(|| raw.to_string()))
        };
        out.insert(name.clone(), value);
    }
    Ok(out)
}
