//! Declarative table reconciliation.
//!
//! Given a table, its key columns, the desired column values and an optional
//! filter, decide whether the stored rows already match and, if not, converge
//! them with a single insert, update or delete.

pub mod db;
pub mod error;
pub mod filter;
pub mod format;
pub mod predicate;
pub mod reconcile;
pub mod request;
pub mod table;
pub mod types;

pub use error::{ReconcileError, Result};
pub use filter::FilterExpr;
pub use reconcile::{ReconcileRequest, ReconcileResult, Reconciler, State};
pub use table::ColumnSpec;
pub use types::{TypeName, TypeRegistry, Value};
