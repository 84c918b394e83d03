//! Filter expressions
//!
//! The caller's recursive filter document, parsed into a tagged tree:
//!
//! ```json
//! {"and": [
//!     {"eq": {"column": "status", "value": "active"}},
//!     {"or": [
//!         {"ilike": {"column": "name", "value": "a%"}},
//!         {"gt": {"column": "age", "value": 30}}
//!     ]}
//! ]}
//! ```
//!
//! Operator names are kept as written; resolving them against the closed
//! comparator set happens in the predicate compiler.

use crate::error::{ReconcileError, Result};
use crate::types::RawValue;
use serde_json::Map;

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Compare {
        operator: String,
        column: String,
        value: RawValue,
    },
}

impl FilterExpr {
    pub fn and(children: Vec<FilterExpr>) -> Self {
        FilterExpr::And(children)
    }

    pub fn or(children: Vec<FilterExpr>) -> Self {
        FilterExpr::Or(children)
    }

    pub fn compare(
        operator: impl Into<String>,
        column: impl Into<String>,
        value: RawValue,
    ) -> Self {
        FilterExpr::Compare {
            operator: operator.into(),
            column: column.into(),
            value,
        }
    }

    /// Parse a filter document.
    pub fn parse(doc: &RawValue) -> Result<Self> {
        match doc {
            RawValue::Object(map) => parse_object(map),
            // a bare list reads as an implicit `and`
            RawValue::Array(items) => Ok(FilterExpr::And(parse_children("and", items)?)),
            other => Err(ReconcileError::InvalidFilter(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    /// Every column name the expression refers to.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
            FilterExpr::Compare { column, .. } => out.push(column),
        }
    }
}

fn parse_object(map: &Map<String, RawValue>) -> Result<FilterExpr> {
    if map.is_empty() {
        return Err(ReconcileError::InvalidFilter("empty filter object".to_string()));
    }

    let mut entries = map
        .iter()
        .map(|(key, payload)| parse_entry(key, payload))
        .collect::<Result<Vec<_>>>()?;

    if entries.len() == 1 {
        Ok(entries.remove(0))
    } else {
        Ok(FilterExpr::And(entries))
    }
}

fn parse_entry(key: &str, payload: &RawValue) -> Result<FilterExpr> {
    match key.to_ascii_lowercase().as_str() {
        "and" => match payload {
            RawValue::Array(items) => Ok(FilterExpr::And(parse_children(key, items)?)),
            _ => Err(ReconcileError::InvalidFilter(format!("'{}' expects a list", key))),
        },
        "or" => match payload {
            RawValue::Array(items) => Ok(FilterExpr::Or(parse_children(key, items)?)),
            _ => Err(ReconcileError::InvalidFilter(format!("'{}' expects a list", key))),
        },
        _ => parse_compare(key, payload),
    }
}

fn parse_children(key: &str, items: &[RawValue]) -> Result<Vec<FilterExpr>> {
    if items.is_empty() {
        return Err(ReconcileError::InvalidFilter(format!(
            "'{}' needs at least one condition",
            key
        )));
    }
    items.iter().map(FilterExpr::parse).collect()
}

fn parse_compare(operator: &str, payload: &RawValue) -> Result<FilterExpr> {
    let body = payload.as_object().ok_or_else(|| {
        ReconcileError::InvalidFilter(format!(
            "'{}' expects an object with 'column' and 'value'",
            operator
        ))
    })?;

    let column = body
        .get("column")
        .and_then(RawValue::as_str)
        .ok_or_else(|| {
            ReconcileError::InvalidFilter(format!("'{}' is missing a 'column' name", operator))
        })?;

    Ok(FilterExpr::Compare {
        operator: operator.to_string(),
        column: column.to_string(),
        value: body.get("value").cloned().unwrap_or(RawValue::Null),
    })
}
