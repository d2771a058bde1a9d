//! Error types for the ORM layer
//!
//! Covers database failures, the normalized constraint-violation taxonomy,
//! not-found signalling and query building errors.

use serde_json::Value;
use thiserror::Error;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Error type for model and query operations
#[derive(Debug, Error)]
pub enum ModelError {
    /// Generic database error, untranslated
    #[error("Database error: {0}")]
    Database(String),

    /// Unique constraint violation (SQLSTATE 23505)
    #[error("Unique constraint violation{}: {message}", fmt_constraint(.constraint))]
    UniqueViolation {
        constraint: Option<String>,
        message: String,
    },

    /// Foreign key constraint violation (SQLSTATE 23503)
    #[error("Foreign key violation{}: {message}", fmt_constraint(.constraint))]
    ForeignKeyViolation {
        constraint: Option<String>,
        message: String,
    },

    /// Not-null constraint violation (SQLSTATE 23502)
    #[error("Not-null violation: {message}")]
    NotNullViolation { message: String },

    /// Check constraint violation (SQLSTATE 23514)
    #[error("Check constraint violation{}: {message}", fmt_constraint(.constraint))]
    CheckViolation {
        constraint: Option<String>,
        message: String,
    },

    /// Invalid data for the column type (SQLSTATE class 22)
    #[error("Data error: {0}")]
    DataError(String),

    /// Record not found in database
    #[error("Record not found in table '{0}'")]
    NotFound(String),

    /// Structured not-found error carrying the query context that failed.
    /// Produced instead of [`ModelError::NotFound`] for models decorated
    /// with HTTP not-found handling; maps to a 404 response.
    #[error("Not Found: {resource}")]
    NotFoundWithContext { resource: String, context: Value },

    /// Relationship traversal failed
    #[error("Relationship error: {0}")]
    Relationship(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection or pool error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query building error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),
}

fn fmt_constraint(constraint: &Option<String>) -> String {
    match constraint {
        Some(name) => format!(" on '{}'", name),
        None => String::new(),
    }
}

impl ModelError {
    /// HTTP status this error maps to when surfaced through a request.
    pub fn status(&self) -> u16 {
        match self {
            ModelError::NotFound(_) | ModelError::NotFoundWithContext { .. } => 404,
            ModelError::UniqueViolation { .. } => 409,
            ModelError::ForeignKeyViolation { .. }
            | ModelError::NotNullViolation { .. }
            | ModelError::CheckViolation { .. }
            | ModelError::DataError(_) => 400,
            _ => 500,
        }
    }

    /// True for any not-found variant, structured or plain.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ModelError::NotFound(_) | ModelError::NotFoundWithContext { .. }
        )
    }
}

impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        ModelError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

/// Error types for query builder operations
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// Operation not available on this model or builder state
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Write operation built without a payload
    #[error("Missing payload for {0}")]
    MissingPayload(String),

    /// Invalid parameter binding
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Translate a low-level sqlx error into the normalized taxonomy.
///
/// Constraint violations are distinguished by SQLSTATE code; anything the
/// classifier does not recognize falls back to [`ModelError::Database`].
pub fn translate_db_error(err: &sqlx::Error) -> ModelError {
    match err {
        sqlx::Error::RowNotFound => ModelError::NotFound(String::new()),
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            ModelError::Connection(err.to_string())
        }
        sqlx::Error::Database(db_err) => classify_sqlstate(
            db_err.code().as_deref(),
            db_err.constraint(),
            db_err.message(),
        ),
        other => ModelError::Database(other.to_string()),
    }
}

/// Classify a raw SQLSTATE code into the violation taxonomy.
pub fn classify_sqlstate(
    code: Option<&str>,
    constraint: Option<&str>,
    message: &str,
) -> ModelError {
    let constraint = constraint.map(str::to_string);
    let message = message.to_string();
    match code {
        Some("23505") => ModelError::UniqueViolation {
            constraint,
            message,
        },
        Some("23503") => ModelError::ForeignKeyViolation {
            constraint,
            message,
        },
        Some("23502") => ModelError::NotNullViolation { message },
        Some("23514") => ModelError::CheckViolation {
            constraint,
            message,
        },
        Some(code) if code.starts_with("22") => ModelError::DataError(message),
        _ => ModelError::Database(message),
    }
}
