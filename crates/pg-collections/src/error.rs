//! Error types for the collection engine.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for query, collection and migration operations.
#[derive(Error, Debug)]
pub enum OrmError {
    /// No row matched an id or where-expression lookup.
    #[error("Entity is not found: {collection} {condition}")]
    EntityNotFound {
        collection: String,
        condition: String,
    },

    /// A statement failed during execution.
    ///
    /// Carries the rendered SQL and its bound values so the failure can be
    /// logged and classified without the driver's error object.
    #[error("Query failed: {message}\n  SQL: {sql}\n  Values: {values}")]
    Query {
        sql: String,
        values: String,
        message: String,
    },

    /// A table or column name failed identifier validation.
    #[error("Field name contains unacceptable characters: {0:?}")]
    InvalidIdentifier(String),

    /// A filter used an operator key outside the operator table.
    #[error("Unknown operator {operator:?} for field {field:?}")]
    UnknownOperator { field: String, operator: String },

    /// A filter applied an operator to a column kind that does not support it.
    #[error("Operator {operator:?} cannot be applied to {kind} column {field:?}")]
    OperatorMismatch {
        field: String,
        operator: String,
        kind: String,
    },

    /// A filter or selection referenced a column the entity does not declare.
    #[error("Unknown column {field:?} in collection {collection}")]
    UnknownColumn { collection: String, field: String },

    /// A filter expression could not be parsed.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// An update was requested with no assignments.
    #[error("Update of {collection} has no fields to set")]
    EmptyPatch { collection: String },

    /// A fragment was assembled with mismatched parts and interpolations.
    #[error("Malformed fragment: {parts} literal parts for {interpolations} interpolations")]
    MalformedFragment { parts: usize, interpolations: usize },

    /// An operation was issued on a transaction that already committed or rolled back.
    #[error("Transaction is already {0}")]
    TransactionClosed(&'static str),

    /// Migration discovery or history consistency failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A migration script failed to execute.
    #[error("Migration {name} failed: {source}")]
    MigrationScript {
        name: String,
        #[source]
        source: Box<OrmError>,
    },

    /// A row could not be shaped into the requested type.
    #[error("Failed to decode {collection} row: {message}")]
    Decode { collection: String, message: String },

    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A failure shared by every caller of one coalesced batch.
    #[error(transparent)]
    Batched(Arc<OrmError>),

    /// Generic structured error raised by collaborators of the engine.
    #[error("{name}: {context}")]
    Exception { name: String, context: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrmError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        OrmError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a not-found error for a collection lookup.
    pub fn not_found(collection: impl Into<String>, condition: impl Into<String>) -> Self {
        OrmError::EntityNotFound {
            collection: collection.into(),
            condition: condition.into(),
        }
    }

    /// Create a generic named exception.
    pub fn exception(name: impl Into<String>, context: impl Into<String>) -> Self {
        OrmError::Exception {
            name: name.into(),
            context: context.into(),
        }
    }

    /// The underlying error, looking through shared batch failures.
    pub fn root(&self) -> &OrmError {
        match self {
            OrmError::Batched(inner) => inner.root(),
            other => other,
        }
    }

    /// Whether this is a recoverable not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), OrmError::EntityNotFound { .. })
    }

    /// Process exit code for the error class.
    pub fn exit_code(&self) -> u8 {
        match self.root() {
            OrmError::Config(_) | OrmError::Yaml(_) => 1,
            OrmError::Query { .. } | OrmError::Pool { .. } | OrmError::TransactionClosed(_) => 2,
            OrmError::Migration(_) | OrmError::MigrationScript { .. } => 3,
            OrmError::Io(_) => 7,
            _ => 4,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, OrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = OrmError::not_found("users", "\"42\"");
        assert_eq!(err.to_string(), "Entity is not found: users \"42\"");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_batched_error_exposes_root() {
        let err = OrmError::Batched(Arc::new(OrmError::not_found("users", "1")));
        assert!(err.is_not_found());
        assert!(matches!(err.root(), OrmError::EntityNotFound { .. }));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(OrmError::Config("x".into()).exit_code(), 1);
        assert_eq!(OrmError::Migration("x".into()).exit_code(), 3);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(OrmError::Io(io).exit_code(), 7);
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let err = OrmError::MigrationScript {
            name: "init".into(),
            source: Box::new(OrmError::Query {
                sql: "CREATE TABLE".into(),
                values: "[]".into(),
                message: "syntax error".into(),
            }),
        };
        let detailed = err.format_detailed();
        assert!(detailed.contains("Migration init failed"));
        assert!(detailed.contains("Caused by"));
        assert!(detailed.contains("syntax error"));
    }
}
