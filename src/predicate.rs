//! Predicate Compiler
//!
//! Lowers key equalities and the caller's [`FilterExpr`] into one composable
//! [`Predicate`] tree, then renders it as a parameterised SQL `WHERE`
//! fragment.
//!
//! Operators come from a closed table ([`Comparator`]). A name without an
//! explicit entry fails fast with `UnknownOperator` instead of matching
//! nothing.

use crate::error::{ReconcileError, Result};
use crate::filter::FilterExpr;
use crate::table::{quote_ident, DesiredValues, TableSchema};
use crate::types::{RawValue, TypeRegistry, Value};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    Ilike,
    NotLike,
    NotIlike,
    In,
    NotIn,
    Is,
    IsNot,
    StartsWith,
    EndsWith,
    Contains,
    Between,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "eq",
            Comparator::Ne => "ne",
            Comparator::Lt => "lt",
            Comparator::Le => "le",
            Comparator::Gt => "gt",
            Comparator::Ge => "ge",
            Comparator::Like => "like",
            Comparator::Ilike => "ilike",
            Comparator::NotLike => "notlike",
            Comparator::NotIlike => "notilike",
            Comparator::In => "in",
            Comparator::NotIn => "notin",
            Comparator::Is => "is",
            Comparator::IsNot => "isnot",
            Comparator::StartsWith => "startswith",
            Comparator::EndsWith => "endswith",
            Comparator::Contains => "contains",
            Comparator::Between => "between",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparator {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let op = match s {
            "eq" => Comparator::Eq,
            "ne" => Comparator::Ne,
            "lt" => Comparator::Lt,
            "le" => Comparator::Le,
            "gt" => Comparator::Gt,
            "ge" => Comparator::Ge,
            "like" => Comparator::Like,
            "ilike" => Comparator::Ilike,
            "notlike" => Comparator::NotLike,
            "notilike" => Comparator::NotIlike,
            "in" => Comparator::In,
            "notin" => Comparator::NotIn,
            "is" => Comparator::Is,
            "isnot" => Comparator::IsNot,
            "startswith" => Comparator::StartsWith,
            "endswith" => Comparator::EndsWith,
            "contains" => Comparator::Contains,
            "between" => Comparator::Between,
            _ => return Err(()),
        };
        Ok(op)
    }
}

/// Right-hand side of a comparison, already coerced to the column type.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Single(Value),
    List(Vec<Value>),
    Range(Value, Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// No restriction.
    All,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Compare {
        column: String,
        op: Comparator,
        operand: Operand,
    },
}

/// A rendered condition and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Predicate::Compare {
            column: column.into(),
            op: Comparator::Eq,
            operand: Operand::Single(value),
        }
    }

    /// Conjunction that collapses the trivial cases.
    pub fn all_of(mut parts: Vec<Predicate>) -> Self {
        parts.retain(|p| *p != Predicate::All);
        match parts.len() {
            0 => Predicate::All,
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Predicate::All)
    }

    /// Render as a condition. `None` for [`Predicate::All`].
    pub fn to_sql(&self) -> Option<SqlFragment> {
        if self.is_all() {
            return None;
        }
        let mut params = Vec::new();
        let sql = self.render(&mut params);
        Some(SqlFragment { sql, params })
    }

    /// `" WHERE ..."` or an empty clause, plus its parameters.
    pub fn where_clause(&self) -> (String, Vec<Value>) {
        match self.to_sql() {
            Some(fragment) => (format!(" WHERE {}", fragment.sql), fragment.params),
            None => (String::new(), Vec::new()),
        }
    }

    fn render(&self, params: &mut Vec<Value>) -> String {
        match self {
            Predicate::All => "1 = 1".to_string(),
            Predicate::And(children) => render_group(children, " AND ", params),
            Predicate::Or(children) => render_group(children, " OR ", params),
            Predicate::Compare {
                column,
                op,
                operand,
            } => render_compare(column, *op, operand, params),
        }
    }
}

fn render_group(children: &[Predicate], joiner: &str, params: &mut Vec<Value>) -> String {
    let parts: Vec<String> = children.iter().map(|c| c.render(params)).collect();
    format!("({})", parts.join(joiner))
}

fn render_compare(
    column: &str,
    op: Comparator,
    operand: &Operand,
    params: &mut Vec<Value>,
) -> String {
    let col = quote_ident(column);

    match (op, operand) {
        (Comparator::Eq, Operand::Single(Value::Null)) => format!("{} IS NULL", col),
        (Comparator::Ne, Operand::Single(Value::Null)) => format!("{} IS NOT NULL", col),
        (Comparator::In, Operand::List(values)) => render_in(&col, "IN", values, "0 = 1", params),
        (Comparator::NotIn, Operand::List(values)) => {
            render_in(&col, "NOT IN", values, "1 = 1", params)
        }
        (Comparator::Between, Operand::Range(low, high)) => {
            params.push(low.clone());
            params.push(high.clone());
            format!("{} BETWEEN ? AND ?", col)
        }
        // SQLite's LOWER folds ASCII only; other letters must match exactly
        (Comparator::Ilike, Operand::Single(v)) => {
            params.push(v.clone());
            format!("LOWER({}) LIKE LOWER(?)", col)
        }
        (Comparator::NotIlike, Operand::Single(v)) => {
            params.push(v.clone());
            format!("LOWER({}) NOT LIKE LOWER(?)", col)
        }
        (Comparator::StartsWith, Operand::Single(v)) => {
            params.push(Value::Text(format!("{}%", escape_like(&v.to_text()))));
            format!("{} LIKE ? ESCAPE '\\'", col)
        }
        (Comparator::EndsWith, Operand::Single(v)) => {
            params.push(Value::Text(format!("%{}", escape_like(&v.to_text()))));
            format!("{} LIKE ? ESCAPE '\\'", col)
        }
        (Comparator::Contains, Operand::Single(v)) => {
            params.push(Value::Text(format!("%{}%", escape_like(&v.to_text()))));
            format!("{} LIKE ? ESCAPE '\\'", col)
        }
        (op, Operand::Single(v)) => {
            let sql_op = match op {
                Comparator::Eq => "=",
                Comparator::Ne => "<>",
                Comparator::Lt => "<",
                Comparator::Le => "<=",
                Comparator::Gt => ">",
                Comparator::Ge => ">=",
                Comparator::Like => "LIKE",
                Comparator::NotLike => "NOT LIKE",
                Comparator::Is => "IS",
                Comparator::IsNot => "IS NOT",
                // list and range operators never carry a single operand
                _ => "=",
            };
            params.push(v.clone());
            format!("{} {} ?", col, sql_op)
        }
        // operand shapes are fixed by `lower_compare`; keep any mismatch false
        _ => "0 = 1".to_string(),
    }
}

fn render_in(
    col: &str,
    keyword: &str,
    values: &[Value],
    empty: &str,
    params: &mut Vec<Value>,
) -> String {
    if values.is_empty() {
        return empty.to_string();
    }
    let placeholders = vec!["?"; values.len()].join(", ");
    params.extend(values.iter().cloned());
    format!("{} {} ({})", col, keyword, placeholders)
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Compile key equalities and the optional filter into one predicate.
///
/// Key columns with a desired value become `column = value`. Keys without
/// one contribute nothing. Filter predicates are always ANDed with the key
/// equalities, so a filter can only narrow the match.
pub fn compile(
    schema: &TableSchema,
    registry: &TypeRegistry,
    keys: &[String],
    desired: &DesiredValues,
    filter: Option<&FilterExpr>,
) -> Result<Predicate> {
    let mut parts = Vec::new();

    for key in keys {
        schema.require_column(key)?;
        match desired.get(key) {
            Some(value) => parts.push(Predicate::eq(key.clone(), value.clone())),
            None => {
                let named_by_filter = filter
                    .map(|f| f.columns().contains(&key.as_str()))
                    .unwrap_or(false);
                if !named_by_filter {
                    warn!(
                        "Key column '{}' has no desired value and no filter condition; \
                         it does not restrict the match",
                        key
                    );
                }
            }
        }
    }

    if let Some(filter) = filter {
        parts.push(lower(schema, registry, filter)?);
    }

    Ok(Predicate::all_of(parts))
}

/// Structural recursion over the filter tree.
fn lower(schema: &TableSchema, registry: &TypeRegistry, expr: &FilterExpr) -> Result<Predicate> {
    match expr {
        FilterExpr::And(children) => Ok(Predicate::And(
            children
                .iter()
                .map(|c| lower(schema, registry, c))
                .collect::<Result<Vec<_>>>()?,
        )),
        FilterExpr::Or(children) => Ok(Predicate::Or(
            children
                .iter()
                .map(|c| lower(schema, registry, c))
                .collect::<Result<Vec<_>>>()?,
        )),
        FilterExpr::Compare { operator, column, value } => {
            lower_compare(schema, registry, operator, column, value)
        }
    }
}

fn lower_compare(
    schema: &TableSchema,
    registry: &TypeRegistry,
    operator: &str,
    column: &str,
    raw: &RawValue,
) -> Result<Predicate> {
    let col = schema.require_column(column)?;
    let op = operator
        .parse::<Comparator>()
        .map_err(|_| ReconcileError::UnknownOperator {
            column: column.to_string(),
            operator: operator.to_string(),
        })?;
    let info = registry.info(col.ty);

    let operand = match op {
        Comparator::In | Comparator::NotIn => {
            let items = raw.as_array().ok_or_else(|| ReconcileError::InvalidValue {
                column: column.to_string(),
                type_name: col.ty.to_string(),
                reason: format!("'{}' expects a list of values", op),
            })?;
            Operand::List(
                items
                    .iter()
                    .map(|item| info.coerce_for(column, item))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        Comparator::Between => match raw.as_array().map(Vec::as_slice) {
            Some([low, high]) => Operand::Range(
                info.coerce_for(column, low)?,
                info.coerce_for(column, high)?,
            ),
            _ => {
                return Err(ReconcileError::InvalidValue {
                    column: column.to_string(),
                    type_name: col.ty.to_string(),
                    reason: "'between' expects a list of two values".to_string(),
                })
            }
        },
        Comparator::Like
        | Comparator::Ilike
        | Comparator::NotLike
        | Comparator::NotIlike
        | Comparator::StartsWith
        | Comparator::EndsWith
        | Comparator::Contains => {
            // patterns are text whatever the column type
            let text = match raw {
                RawValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            Operand::Single(Value::Text(text))
        }
        _ => Operand::Single(if raw.is_null() {
            Value::Null
        } else {
            info.coerce_for(column, raw)?
        }),
    };

    Ok(Predicate::Compare {
        column: column.to_string(),
        op,
        operand,
    })
}
