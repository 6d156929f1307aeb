mod model;
mod repository;

pub use model::{AccountCheckpointDB, SyncCursorDB};
pub use repository::{CheckpointRepository, CursorRepository};
