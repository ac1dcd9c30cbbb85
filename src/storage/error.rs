use std::error::Error as _;
use tokio_postgres::error::SqlState;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage failures, split by whether retrying can help
///
/// The split decides what happens to the delivery: a transient failure is
/// handed back to the broker for redelivery, a permanent one is dead-lettered.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database unreachable, connection dropped, or reconnect budget exhausted
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Constraint violations and any other rejection by the database
    #[error("Permanent storage error: {0}")]
    Permanent(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Classify tokio-postgres errors
impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_error) = err.as_db_error() {
            let message = format!("{}: {}", db_error.code().code(), db_error.message());

            return if is_transient_sqlstate(db_error.code()) {
                StorageError::Transient(message)
            } else {
                StorageError::Permanent(message)
            };
        }

        // Closed connections and socket failures carry no SQLSTATE
        let io_failure = err
            .source()
            .map_or(false, |source| source.is::<std::io::Error>());

        if err.is_closed() || io_failure {
            StorageError::Transient(err.to_string())
        } else {
            StorageError::Permanent(format!("{:?}", err))
        }
    }
}

/// SQLSTATEs that mean the server, not the statement, is the problem
///
/// Class 08 (connection exception), server shutdown/startup, and connection
/// slot exhaustion.
pub fn is_transient_sqlstate(code: &SqlState) -> bool {
    code.code().starts_with("08")
        || *code == SqlState::ADMIN_SHUTDOWN
        || *code == SqlState::CRASH_SHUTDOWN
        || *code == SqlState::CANNOT_CONNECT_NOW
        || *code == SqlState::TOO_MANY_CONNECTIONS
}

/// A database connection string could not be parsed
#[derive(Debug, thiserror::Error)]
#[error("Invalid database connection string: {0}")]
pub struct ConnectionStringError(pub String);
