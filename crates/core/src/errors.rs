//! Error taxonomy shared by the sync engine and its adapters.

use thiserror::Error;

use crate::retry::{classify_http_status, RetryClass};

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transient transport or HTTP failure talking to the upstream API.
    #[error("Network error{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Network {
        status: Option<u16>,
        message: String,
    },

    /// The upstream violated its pagination contract for an account.
    #[error("Protocol error for account {account_id}: {message}")]
    Protocol { account_id: String, message: String },

    /// A record failed minimal validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Destination store failure.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// The destination refused a partition-mutating write.
    #[error("Write quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A checkpoint could not be durably written.
    #[error("Checkpoint integrity error for account {account_id}: {message}")]
    CheckpointIntegrity { account_id: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Fatal error that stopped a sync run.
    #[error("Sync run aborted while {stage}{}: {message}", account_id.as_ref().map(|a| format!(" (account {})", a)).unwrap_or_default())]
    RunAborted {
        stage: String,
        account_id: Option<String>,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The database was busy or locked by another writer.
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn network(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Network {
            status,
            message: message.into(),
        }
    }

    pub fn protocol(account_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            account_id: account_id.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn checkpoint_integrity(account_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CheckpointIntegrity {
            account_id: account_id.into(),
            message: message.into(),
        }
    }

    pub fn aborted(stage: impl Into<String>, account_id: Option<String>, cause: &Error) -> Self {
        Self::RunAborted {
            stage: stage.into(),
            account_id,
            message: cause.to_string(),
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Network { status: None, .. } => RetryClass::Retryable,
            Self::Network {
                status: Some(status),
                ..
            } => classify_http_status(*status),
            Self::Database(DatabaseError::Busy(_))
            | Self::Database(DatabaseError::ConnectionFailed(_)) => RetryClass::Retryable,
            Self::QuotaExceeded(_) => RetryClass::Retryable,
            _ => RetryClass::Permanent,
        }
    }

    /// Errors that must stop the whole run rather than fail one account.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            Self::CheckpointIntegrity { .. } | Self::QuotaExceeded(_) | Self::RunAborted { .. }
        )
    }
}
