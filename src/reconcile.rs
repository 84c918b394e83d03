//! Reconciler / state machine
//!
//! Fetch once, decide, apply at most one mutating statement, fetch again.
//!
//! The read-decide-write sequence runs outside any transaction, so two
//! concurrent runs against the same rows can both decide to write. Callers
//! that need a linearizable read-modify-write must serialize invocations or
//! wrap the run in their own transaction.

use crate::db::fetch::{count_of, fetch, table_exists, FetchOptions, COUNT_COLUMN};
use crate::db::mutate;
use crate::error::Result;
use crate::filter::FilterExpr;
use crate::format::{format_rows, Row};
use crate::predicate::{compile, Predicate};
use crate::table::{build, ColumnSpec, DesiredValues, TableSchema};
use crate::types::{TypeRegistry, Value};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Requested end state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Present,
    Absent,
    Select,
    Insert,
    Count,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Present => "present",
            State::Absent => "absent",
            State::Select => "select",
            State::Insert => "insert",
            State::Count => "count",
        };
        f.write_str(s)
    }
}

/// One reconciliation run, minus the connection.
#[derive(Debug, Clone, Default)]
pub struct ReconcileRequest {
    pub table: String,
    pub keys: Vec<String>,
    pub columns: Vec<ColumnSpec>,
    pub state: State,
    pub distinct: bool,
    pub filter: Option<FilterExpr>,
    pub check_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileResult {
    pub changed: bool,
    pub rows: Option<Vec<Row>>,
}

impl ReconcileResult {
    fn unchanged(rows: Vec<Row>) -> Self {
        Self {
            changed: false,
            rows: Some(rows),
        }
    }

    /// What a run against an empty table reports, without touching storage.
    fn against_empty(plan: &Plan, state: State) -> Self {
        match state {
            State::Present | State::Insert => Self {
                changed: true,
                rows: Some(vec![plan.desired.to_row()]),
            },
            State::Absent => Self {
                changed: false,
                rows: None,
            },
            State::Select => Self::unchanged(Vec::new()),
            State::Count => Self::unchanged(vec![count_row(0)]),
        }
    }
}

/// Everything the state machine needs once the inputs are resolved.
#[derive(Debug, Clone)]
pub struct Plan {
    pub schema: TableSchema,
    pub desired: DesiredValues,
    pub predicate: Predicate,
}

/// Build the descriptor and compile the predicate. Touches no storage.
pub fn plan(request: &ReconcileRequest, registry: &TypeRegistry) -> Result<Plan> {
    let (schema, desired) = build(&request.table, &request.columns, registry)?;
    let predicate = compile(
        &schema,
        registry,
        &request.keys,
        &desired,
        request.filter.as_ref(),
    )?;

    if predicate.is_all() && request.state == State::Absent {
        warn!(
            "No condition restricts '{}': state=absent will delete every row",
            schema.name
        );
    }

    Ok(Plan {
        schema,
        desired,
        predicate,
    })
}

pub struct Reconciler<'a> {
    conn: &'a Connection,
    registry: &'a TypeRegistry,
}

impl<'a> Reconciler<'a> {
    pub fn new(conn: &'a Connection, registry: &'a TypeRegistry) -> Self {
        Self { conn, registry }
    }

    /// Run the request, first creating the table from the column specs when
    /// `create_table` is set and it does not exist yet.
    ///
    /// In check mode a missing table is never created; the result is what
    /// the run would report against the freshly created, empty table.
    pub fn apply(&self, request: &ReconcileRequest, create_table: bool) -> Result<ReconcileResult> {
        if create_table {
            let plan = plan(request, self.registry)?;
            if !table_exists(self.conn, &plan.schema.name)? {
                if request.check_mode {
                    info!("Table '{}' does not exist, would create it", plan.schema.name);
                    return Ok(ReconcileResult::against_empty(&plan, request.state));
                }
                info!("Creating table '{}'", plan.schema.name);
                self.conn.execute(&plan.schema.create_table_sql(self.registry), [])?;
            }
        }
        self.run(request)
    }

    /// Run the request to completion. Any failure aborts the run.
    pub fn run(&self, request: &ReconcileRequest) -> Result<ReconcileResult> {
        let plan = plan(request, self.registry)?;
        info!(
            "Reconciling '{}' to state={} (check_mode={})",
            plan.schema.name, request.state, request.check_mode
        );

        let options = FetchOptions {
            distinct: request.distinct,
            count_only: request.state == State::Count,
        };
        let fetched = fetch(self.conn, &plan.schema, &plan.predicate, options)?;
        let current = if request.state == State::Count {
            vec![count_row(count_of(&fetched))]
        } else {
            format_rows(&fetched, &plan.schema, self.registry)?
        };

        let result = match request.state {
            State::Select | State::Count => ReconcileResult::unchanged(current),
            State::Absent => self.absent(&plan, &current, request.check_mode)?,
            State::Insert => self.insert(&plan, request)?,
            State::Present => self.present(&plan, current, request)?,
        };

        info!("Reconciled '{}': changed={}", plan.schema.name, result.changed);
        Ok(result)
    }

    fn absent(&self, plan: &Plan, current: &[Row], check_mode: bool) -> Result<ReconcileResult> {
        let changed = !current.is_empty();
        if changed && !check_mode {
            mutate::delete(self.conn, &plan.schema, &plan.predicate)?;
        }
        Ok(ReconcileResult { changed, rows: None })
    }

    fn insert(&self, plan: &Plan, request: &ReconcileRequest) -> Result<ReconcileResult> {
        if request.check_mode {
            return Ok(ReconcileResult {
                changed: true,
                rows: Some(vec![plan.desired.to_row()]),
            });
        }

        mutate::insert(self.conn, &plan.schema, &plan.desired)?;
        let rows = self.refetch(plan, request)?;
        Ok(ReconcileResult {
            changed: true,
            rows: Some(rows),
        })
    }

    fn present(
        &self,
        plan: &Plan,
        current: Vec<Row>,
        request: &ReconcileRequest,
    ) -> Result<ReconcileResult> {
        let changed =
            current.is_empty() || current.iter().any(|row| differs(row, &plan.desired));

        if request.check_mode {
            return Ok(ReconcileResult {
                changed,
                rows: Some(vec![plan.desired.to_row()]),
            });
        }
        if !changed {
            return Ok(ReconcileResult::unchanged(current));
        }

        if current.is_empty() {
            mutate::insert(self.conn, &plan.schema, &plan.desired)?;
        } else {
            // keys identify rows, they are never rewritten
            let values: Vec<(&str, &Value)> = plan
                .desired
                .iter()
                .filter(|(name, _)| !request.keys.contains(*name))
                .map(|(name, value)| (name.as_str(), value))
                .collect();
            mutate::update(self.conn, &plan.schema, &plan.predicate, &values)?;
        }

        let rows = self.refetch(plan, request)?;
        Ok(ReconcileResult {
            changed: true,
            rows: Some(rows),
        })
    }

    fn refetch(&self, plan: &Plan, request: &ReconcileRequest) -> Result<Vec<Row>> {
        let options = FetchOptions {
            distinct: request.distinct,
            count_only: false,
        };
        let fetched = fetch(self.conn, &plan.schema, &plan.predicate, options)?;
        format_rows(&fetched, &plan.schema, self.registry)
    }
}

/// The single row a count reports. Never typed through the schema.
fn count_row(count: i64) -> Row {
    Row::from([(COUNT_COLUMN.to_string(), Value::Integer(count))])
}

/// True when any desired column holds a different value in `row`.
fn differs(row: &Row, desired: &DesiredValues) -> bool {
    desired
        .iter()
        .any(|(name, value)| row.get(name).map_or(true, |stored| stored != value))
}
