mod model;
mod repository;

pub use model::{NewStagedTransactionDB, TransactionDB};
pub use repository::TransactionRepository;
