use thiserror::Error;

/// Errors raised by the persistence helper and the store backends.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("No mappable columns for table `{0}`")]
    NoColumns(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Malformed query: {0}")]
    MalformedQuery(String),
    #[error("Unique constraint violation on `{table}` ({constraint})")]
    UniqueViolation {
        table: String,
        constraint: String,
        column: Option<String>,
    },
    #[error("Foreign key constraint violation: {0}")]
    ForeignKeyViolation(String),
    #[error("Column `{table}.{column}` must not be null")]
    NotNullViolation { table: String, column: String },
    #[error("Batch chunk {} of {chunks} failed ({committed_rows} rows already committed): {source}", .chunk + 1)]
    BatchFailed {
        chunk: usize,
        chunks: usize,
        committed_rows: usize,
        #[source]
        source: Box<PersistenceError>,
    },
    #[error("Transaction rolled back")]
    RolledBack,
    #[error("Deadline exceeded before {0}")]
    Timeout(&'static str),
    #[error("Failed to decode row: {0}")]
    Decode(String),
    #[error("Database error: {0}")]
    Database(String),
}

impl PersistenceError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        PersistenceError::NotFound(entity.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        PersistenceError::MalformedQuery(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistenceError::NotFound(_))
    }

    /// True when this is a unique violation on `column`, either reported
    /// directly by the store or recognisable from the constraint name.
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        match self {
            PersistenceError::UniqueViolation {
                column: Some(found), ..
            } => found == column,
            PersistenceError::UniqueViolation { constraint, .. } => {
                constraint.contains(&format!("_{column}_"))
            }
            _ => false,
        }
    }
}

impl From<diesel::result::Error> for PersistenceError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match err {
            Error::NotFound => PersistenceError::not_found("record"),
            Error::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => PersistenceError::UniqueViolation {
                    table: info.table_name().unwrap_or_default().to_string(),
                    constraint: info
                        .constraint_name()
                        .unwrap_or_else(|| info.message())
                        .to_string(),
                    column: info.column_name().map(str::to_string),
                },
                DatabaseErrorKind::ForeignKeyViolation => {
                    PersistenceError::ForeignKeyViolation(info.message().to_string())
                }
                DatabaseErrorKind::NotNullViolation => PersistenceError::NotNullViolation {
                    table: info.table_name().unwrap_or_default().to_string(),
                    column: info.column_name().unwrap_or_default().to_string(),
                },
                DatabaseErrorKind::ClosedConnection => {
                    PersistenceError::Connection(info.message().to_string())
                }
                _ => PersistenceError::Database(info.message().to_string()),
            },
            other => PersistenceError::Database(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for PersistenceError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        PersistenceError::Connection(err.to_string())
    }
}

impl From<diesel::ConnectionError> for PersistenceError {
    fn from(err: diesel::ConnectionError) -> Self {
        PersistenceError::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Decode(err.to_string())
    }
}

/// Repository layer errors. Persistence failures keep the operation and
/// entity they happened in.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Username already taken")]
    DuplicateUsername,
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("Password hashing failed: {0}")]
    Hashing(String),
    #[error("{operation} {entity} failed: {source}")]
    Persistence {
        operation: &'static str,
        entity: &'static str,
        #[source]
        source: PersistenceError,
    },
}

impl RepositoryError {
    /// Wraps a persistence error, turning a missing row into `NotFound`.
    pub fn wrap(operation: &'static str, entity: &'static str, source: PersistenceError) -> Self {
        if source.is_not_found() {
            RepositoryError::NotFound { entity }
        } else {
            RepositoryError::Persistence {
                operation,
                entity,
                source,
            }
        }
    }
}
