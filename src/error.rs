//! Error taxonomy shared by every layer of the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors surfaced by schema declaration, compilation, execution and
/// transaction management.
///
/// Compilation errors (`UnknownLabel`, `AmbiguousBinding`, `TypeMismatch`,
/// `UnknownProperty`, `InvalidQuery`) are raised before any backing-store
/// access happens. Failures reported while rows are being produced abort
/// the session's transaction.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The backing store could not be opened.
    #[error("cannot open database {location}: {source}")]
    Connection {
        /// Database file path, or `:memory:`.
        location: String,
        /// Underlying driver failure.
        #[source]
        source: rusqlite::Error,
    },
    /// A schema with this name already exists and replacement was not requested.
    #[error("property graph '{graph}' already exists")]
    SchemaConflict {
        /// Graph name.
        graph: String,
    },
    /// No schema with this name is declared.
    #[error("property graph '{graph}' does not exist")]
    SchemaNotFound {
        /// Graph name.
        graph: String,
    },
    /// A vertex or edge label is not part of the schema.
    #[error("unknown label '{label}' in graph '{graph}'")]
    UnknownLabel {
        /// Graph name.
        graph: String,
        /// Label as written by the caller.
        label: String,
    },
    /// A pattern variable could bind to more than one label.
    #[error("variable '{var}' is ambiguous: candidate labels {candidates:?}")]
    AmbiguousBinding {
        /// Pattern variable (generated name for anonymous elements).
        var: String,
        /// Labels that remain structurally possible.
        candidates: Vec<String>,
    },
    /// Static or runtime type incompatibility.
    #[error("type mismatch at {context}: {detail}")]
    TypeMismatch {
        /// Variable, label or column the mismatch concerns.
        context: String,
        /// What was expected and what was found.
        detail: String,
    },
    /// A property reference does not resolve against the bound label.
    #[error("unknown property '{prop}' on '{var}' (label '{label}')")]
    UnknownProperty {
        /// Pattern variable.
        var: String,
        /// Label bound to the variable.
        label: String,
        /// Property name.
        prop: String,
    },
    /// The backing store reported a failure while executing a statement.
    #[error("execution failed: {0}")]
    Execution(#[from] rusqlite::Error),
    /// Commit or rollback could not be performed in the current state.
    #[error("transaction error: {0}")]
    Transaction(String),
    /// The cursor row has no column with this name.
    #[error("column '{column}' not found")]
    ColumnNotFound {
        /// Requested column name.
        column: String,
    },
    /// The operation is not valid for the current session or cursor state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The schema declaration is structurally invalid.
    #[error("invalid definition of '{element}': {reason}")]
    InvalidDefinition {
        /// Label or graph the problem was found in.
        element: String,
        /// Description of the problem.
        reason: String,
    },
    /// The pattern query is structurally invalid.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// PGQL text could not be parsed.
    #[error("parse error near '{fragment}'")]
    Parse {
        /// Leading text at the point the parser gave up.
        fragment: String,
    },
    /// The configuration file could not be read or parsed.
    #[error("configuration error in {path}: {reason}")]
    Config {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
}

impl GraphError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            GraphError::Connection { .. } => "ConnectionError",
            GraphError::SchemaConflict { .. } => "SchemaConflict",
            GraphError::SchemaNotFound { .. } => "SchemaNotFound",
            GraphError::UnknownLabel { .. } => "UnknownLabel",
            GraphError::AmbiguousBinding { .. } => "AmbiguousBinding",
            GraphError::TypeMismatch { .. } => "TypeMismatch",
            GraphError::UnknownProperty { .. } => "UnknownProperty",
            GraphError::Execution(_) => "ExecutionError",
            GraphError::Transaction(_) => "TransactionError",
            GraphError::ColumnNotFound { .. } => "ColumnNotFound",
            GraphError::InvalidState(_) => "InvalidState",
            GraphError::InvalidDefinition { .. } => "InvalidDefinition",
            GraphError::InvalidQuery(_) => "InvalidQuery",
            GraphError::Parse { .. } => "ParseError",
            GraphError::Config { .. } => "ConfigError",
        }
    }

    pub(crate) fn type_mismatch(context: impl Into<String>, detail: impl Into<String>) -> Self {
        GraphError::TypeMismatch {
            context: context.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid_definition(element: impl Into<String>, reason: impl Into<String>) -> Self {
        GraphError::InvalidDefinition {
            element: element.into(),
            reason: reason.into(),
        }
    }
}

/// Formats an error prefixed with its code, e.g. `[UnknownLabel] ...`.
pub struct ErrorWithCode<'a>(pub &'a GraphError);

impl std::fmt::Display for ErrorWithCode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
