//! Account checkpoints and the global cursor.

mod checkpoint_store;
mod checkpoints_model;
mod checkpoints_traits;

pub use checkpoint_store::CheckpointStore;
pub use checkpoints_model::{
    AccountCheckpoint, ActiveRun, CheckpointSummary, CursorState, RunStats,
};
pub use checkpoints_traits::{CheckpointRepositoryTrait, CursorRepositoryTrait};
