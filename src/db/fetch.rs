//! Row Fetcher
//!
//! The read path: one `SELECT` over the schema's columns restricted by a
//! compiled predicate. Side-effect free.

use crate::error::{ReconcileError, Result};
use crate::predicate::Predicate;
use crate::table::{quote_ident, TableSchema};
use crate::types::{RawValue, Value};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection};
use serde_json::Map;
use tracing::debug;

/// A row as stored, column name to raw value.
pub type RawRow = Map<String, RawValue>;

/// Column name of the synthetic row returned in count-only mode.
pub const COUNT_COLUMN: &str = "count";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub distinct: bool,
    pub count_only: bool,
}

/// Render the `SELECT` for the given options, with its parameters.
pub fn select_sql(
    schema: &TableSchema,
    predicate: &Predicate,
    options: FetchOptions,
) -> (String, Vec<Value>) {
    let columns: Vec<String> = schema.column_names().map(quote_ident).collect();
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(", ")
    };
    let distinct = if options.distinct { "DISTINCT " } else { "" };
    let (where_sql, params) = predicate.where_clause();

    let select = format!(
        "SELECT {}{} FROM {}{}",
        distinct,
        projection,
        quote_ident(&schema.name),
        where_sql
    );

    if options.count_only {
        let sql = format!(
            "SELECT COUNT(*) AS {} FROM ({})",
            quote_ident(COUNT_COLUMN),
            select
        );
        (sql, params)
    } else {
        (select, params)
    }
}

/// Execute the select and return the raw rows.
pub fn fetch(
    conn: &Connection,
    schema: &TableSchema,
    predicate: &Predicate,
    options: FetchOptions,
) -> Result<Vec<RawRow>> {
    let (sql, params) = select_sql(schema, predicate, options);
    debug!("Fetching: {} ({} params)", sql, params.len());

    let mut stmt = conn.prepare(&sql).map_err(|e| {
        ReconcileError::QueryExecution(format!(
            "Failed to prepare select on '{}': {}",
            schema.name, e
        ))
    })?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut raw = RawRow::new();
        for (idx, name) in names.iter().enumerate() {
            raw.insert(name.clone(), to_raw(name, row.get_ref(idx)?)?);
        }
        out.push(raw);
    }

    debug!("Fetched {} rows from '{}'", out.len(), schema.name);
    Ok(out)
}

/// Number of rows matching the predicate.
pub fn count(
    conn: &Connection,
    schema: &TableSchema,
    predicate: &Predicate,
    distinct: bool,
) -> Result<i64> {
    let options = FetchOptions {
        distinct,
        count_only: true,
    };
    let rows = fetch(conn, schema, predicate, options)?;
    Ok(count_of(&rows))
}

/// Read the total out of a count-only result.
///
/// The synthetic column is read as-is; it never goes through the schema,
/// even when the table has a column that happens to be called `count`.
pub fn count_of(rows: &[RawRow]) -> i64 {
    rows.first()
        .and_then(|row| row.get(COUNT_COLUMN))
        .and_then(RawValue::as_i64)
        .unwrap_or(0)
}

/// Does `table` exist in the connected database.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(found > 0)
}

fn to_raw(column: &str, value: ValueRef<'_>) -> Result<RawValue> {
    Ok(match value {
        ValueRef::Null => RawValue::Null,
        ValueRef::Integer(i) => RawValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(RawValue::Number)
            .unwrap_or(RawValue::Null),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => RawValue::String(text.to_string()),
            Err(e) => {
                return Err(ReconcileError::QueryExecution(format!(
                    "column '{}' holds text that is not valid UTF-8: {}",
                    column, e
                )))
            }
        },
        ValueRef::Blob(_) => {
            return Err(ReconcileError::QueryExecution(format!(
                "column '{}' holds a blob, which is not supported",
                column
            )))
        }
    })
}
