//! Core of the trade ingestion engine: domain models, error taxonomy,
//! configuration and the sync services. Storage and the upstream API plug
//! in through the traits defined here.

pub mod checkpoints;
pub mod config;
pub mod errors;
pub mod references;
pub mod retry;
pub mod sync;
pub mod transactions;

pub use config::{CompactionMode, SyncConfig};
pub use errors::{DatabaseError, Error, Result};
pub use retry::{RetryClass, RetryPolicy};
