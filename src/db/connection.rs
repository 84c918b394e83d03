//! Database connection management using rusqlite

use crate::error::{ReconcileError, Result};
use rusqlite::Connection;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Default time a statement waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the database lives, parsed from a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionDescriptor {
    Memory,
    File(PathBuf),
}

impl FromStr for ConnectionDescriptor {
    type Err = ReconcileError;

    fn from_str(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ReconcileError::Connection("empty connection string".to_string()));
        }
        if url == ":memory:" || url == "sqlite::memory:" || url == "sqlite://:memory:" {
            return Ok(ConnectionDescriptor::Memory);
        }
        if let Some(path) = url.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(ReconcileError::Connection(format!(
                    "missing database path in '{}'",
                    url
                )));
            }
            return Ok(ConnectionDescriptor::File(PathBuf::from(path)));
        }
        if let Some(path) = url.strip_prefix("sqlite:") {
            return Ok(ConnectionDescriptor::File(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = url.split_once("://") {
            return Err(ReconcileError::Connection(format!(
                "unsupported database scheme '{}'",
                scheme
            )));
        }
        Ok(ConnectionDescriptor::File(PathBuf::from(url)))
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDescriptor::Memory => f.write_str("sqlite::memory:"),
            ConnectionDescriptor::File(path) => write!(f, "sqlite://{}", path.display()),
        }
    }
}

/// Open a connection and apply the session settings the engine relies on.
///
/// `case_sensitive_like` makes `like` case-sensitive so `ilike` is the only
/// case-insensitive match. SQLite's built-in `LOWER` folds ASCII letters
/// only, so `ilike` ignores case for ASCII and compares other characters
/// exactly.
pub fn open(descriptor: &ConnectionDescriptor) -> Result<Connection> {
    let conn = match descriptor {
        ConnectionDescriptor::Memory => Connection::open_in_memory(),
        ConnectionDescriptor::File(path) => Connection::open(path),
    }
    .map_err(|e| ReconcileError::Connection(format!("Failed to open {}: {}", descriptor, e)))?;

    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
        .map_err(|e| ReconcileError::Connection(format!("Failed to set busy timeout: {}", e)))?;
    conn.execute_batch("PRAGMA case_sensitive_like = ON;")
        .map_err(|e| ReconcileError::Connection(format!("Failed to configure session: {}", e)))?;

    info!("Opened database {}", descriptor);
    Ok(conn)
}
