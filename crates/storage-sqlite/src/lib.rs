//! SQLite storage for tradesync: staging and production transactions,
//! reference entities, checkpoints and the sync cursor.

pub mod accounts;
pub mod checkpoints;
pub mod db;
pub mod errors;
pub mod references;
pub mod schema;
pub mod transactions;

pub use accounts::AccountRepository;
pub use checkpoints::{CheckpointRepository, CursorRepository};
pub use db::{open, DbPool, WriteHandle};
pub use errors::StorageError;
pub use references::ReferenceRepository;
pub use transactions::TransactionRepository;
