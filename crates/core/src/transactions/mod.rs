//! Transaction records, idempotency keys and the storage/source seams.

mod idempotency;
mod transactions_model;
mod transactions_traits;

pub use idempotency::{derive_key, IdempotencyKey, KeyQuality};
pub use transactions_model::{
    CompactionScope, LandedVersion, MergeOutcome, PageCursor, PageRequest, Side,
    SourceTransaction, Transaction, TransactionPage,
};
pub use transactions_traits::{AccountDirectory, TransactionRepositoryTrait, TransactionSource};
