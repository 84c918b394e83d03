//! Invocation documents
//!
//! The JSON the binary reads (one reconciliation request plus its
//! connection string) and the error document it writes on failure.

use crate::error::{ReconcileError, Result};
use crate::filter::FilterExpr;
use crate::reconcile::{ReconcileRequest, State};
use crate::table::ColumnSpec;
use crate::types::RawValue;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Environment variable consulted when no connection string is given.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Invocation {
    #[serde(default)]
    pub connection: Option<String>,

    pub table: String,

    #[serde(default)]
    pub keys: Vec<String>,

    #[serde(default)]
    pub columns: Vec<ColumnSpec>,

    #[serde(default)]
    pub state: State,

    #[serde(default)]
    pub distinct: bool,

    /// Kept raw so filter errors keep their own error kind
    #[serde(default)]
    pub filter: Option<RawValue>,

    #[serde(default, alias = "checkMode")]
    pub check_mode: bool,
}

impl Invocation {
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load from a file, or from stdin when `path` is `-`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = if path == Path::new("-") {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            std::fs::read_to_string(path)?
        };
        Self::from_json(&content)
    }

    /// Connection string: explicit override, then the document, then `DATABASE_URL`.
    pub fn connection_url(&self, override_url: Option<&str>) -> Result<String> {
        override_url
            .map(str::to_string)
            .or_else(|| self.connection.clone())
            .or_else(|| std::env::var(DATABASE_URL_ENV).ok())
            .ok_or_else(|| {
                ReconcileError::Connection(format!(
                    "no connection given (set 'connection' or {})",
                    DATABASE_URL_ENV
                ))
            })
    }

    pub fn to_request(&self) -> Result<ReconcileRequest> {
        let filter = match &self.filter {
            Some(RawValue::Null) | None => None,
            Some(doc) => Some(FilterExpr::parse(doc)?),
        };

        Ok(ReconcileRequest {
            table: self.table.clone(),
            keys: self.keys.clone(),
            columns: self.columns.clone(),
            state: self.state,
            distinct: self.distinct,
            filter,
            check_mode: self.check_mode,
        })
    }
}

/// Written instead of a result when the run fails.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub failed: bool,
    pub kind: String,
    pub msg: String,
}

impl From<&ReconcileError> for ErrorReport {
    fn from(err: &ReconcileError) -> Self {
        Self {
            failed: true,
            kind: err.kind().to_string(),
            msg: err.to_string(),
        }
    }
}
