//! Storage errors and their mapping onto the core error taxonomy.

use thiserror::Error;
use tradesync_core::errors::{DatabaseError, Error};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    /// A stored value could not be mapped back to the domain model.
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// SQLite reports contention as SQLITE_BUSY / SQLITE_LOCKED.
fn is_busy(err: &diesel::result::Error) -> bool {
    match err {
        diesel::result::Error::DatabaseError(_, info) => {
            let message = info.message().to_ascii_lowercase();
            message.contains("database is locked")
                || message.contains("database table is locked")
                || message.contains("busy")
        }
        _ => false,
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        let kind = match err {
            StorageError::Query(ref e) if is_busy(e) => DatabaseError::Busy(err.to_string()),
            StorageError::Query(_) => DatabaseError::QueryFailed(err.to_string()),
            StorageError::Pool(_) | StorageError::Connection(_) => {
                DatabaseError::ConnectionFailed(err.to_string())
            }
            StorageError::InvalidValue(_) => DatabaseError::Internal(err.to_string()),
        };
        Error::Database(kind)
    }
}
