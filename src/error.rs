use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Unknown type '{type_name}' for column '{column}'")]
    UnknownType { column: String, type_name: String },

    #[error("Invalid value for column '{column}' ({type_name}): {reason}")]
    InvalidValue {
        column: String,
        type_name: String,
        reason: String,
    },

    #[error("Unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("Unknown operator '{operator}' on column '{column}'")]
    UnknownOperator { column: String, operator: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Duplicate column '{0}' in column list")]
    DuplicateColumn(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query execution error: {0}")]
    QueryExecution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Stable kind name reported in the error document.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::UnknownType { .. } => "UnknownTypeError",
            ReconcileError::InvalidValue { .. } => "InvalidValueError",
            ReconcileError::UnknownColumn { .. } => "UnknownColumnError",
            ReconcileError::UnknownOperator { .. } => "UnknownOperatorError",
            ReconcileError::InvalidFilter(_) => "InvalidFilterError",
            ReconcileError::DuplicateColumn(_) => "DuplicateColumnError",
            ReconcileError::Connection(_) => "ConnectionError",
            ReconcileError::QueryExecution(_) => "QueryExecutionError",
            ReconcileError::Io(_) => "IoError",
            ReconcileError::Json(_) => "JsonError",
        }
    }
}

impl From<rusqlite::Error> for ReconcileError {
    fn from(err: rusqlite::Error) -> Self {
        ReconcileError::QueryExecution(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
