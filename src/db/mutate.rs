//! Mutating statements: insert, update, delete.
//!
//! Each function issues exactly one statement and returns the number of
//! affected rows. Failures abort the run; nothing is retried here.

use crate::error::{ReconcileError, Result};
use crate::predicate::Predicate;
use crate::table::{quote_ident, DesiredValues, TableSchema};
use crate::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info};

/// Unconditional insert of the desired values.
pub fn insert(conn: &Connection, schema: &TableSchema, values: &DesiredValues) -> Result<usize> {
    let table = quote_ident(&schema.name);
    let (sql, params): (String, Vec<&Value>) = if values.is_empty() {
        (format!("INSERT INTO {} DEFAULT VALUES", table), Vec::new())
    } else {
        let columns: Vec<String> = values.iter().map(|(name, _)| quote_ident(name)).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        (
            format!("INSERT INTO {} ({}) VALUES ({})", table, columns.join(", "), placeholders),
            values.iter().map(|(_, value)| value).collect(),
        )
    };

    debug!("Insert: {}", sql);
    let inserted = conn
        .execute(&sql, params_from_iter(params))
        .map_err(|e| {
            ReconcileError::QueryExecution(format!(
                "Failed to insert into '{}': {}",
                schema.name, e
            ))
        })?;

    info!("Inserted {} row(s) into '{}'", inserted, schema.name);
    Ok(inserted)
}

/// Update every row matching `predicate`, setting `values`.
pub fn update(
    conn: &Connection,
    schema: &TableSchema,
    predicate: &Predicate,
    values: &[(&str, &Value)],
) -> Result<usize> {
    if values.is_empty() {
        return Ok(0);
    }

    let assignments: Vec<String> = values
        .iter()
        .map(|(name, _)| format!("{} = ?", quote_ident(name)))
        .collect();
    let (where_sql, where_params) = predicate.where_clause();
    let sql = format!(
        "UPDATE {} SET {}{}",
        quote_ident(&schema.name),
        assignments.join(", "),
        where_sql
    );

    let params = values
        .iter()
        .map(|(_, value)| *value)
        .chain(where_params.iter());

    debug!("Update: {}", sql);
    let updated = conn
        .execute(&sql, params_from_iter(params))
        .map_err(|e| {
            ReconcileError::QueryExecution(format!("Failed to update '{}': {}", schema.name, e))
        })?;

    info!("Updated {} row(s) in '{}'", updated, schema.name);
    Ok(updated)
}

/// Delete every row matching `predicate`.
pub fn delete(conn: &Connection, schema: &TableSchema, predicate: &Predicate) -> Result<usize> {
    let (where_sql, params) = predicate.where_clause();
    let sql = format!("DELETE FROM {}{}", quote_ident(&schema.name), where_sql);

    debug!("Delete: {}", sql);
    let deleted = conn
        .execute(&sql, params_from_iter(params.iter()))
        .map_err(|e| {
            ReconcileError::QueryExecution(format!(
                "Failed to delete from '{}': {}",
                schema.name, e
            ))
        })?;

    info!("Deleted {} row(s) from '{}'", deleted, schema.name);
    Ok(deleted)
}
