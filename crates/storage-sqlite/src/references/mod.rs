mod model;
mod repository;

pub use model::{GroupingDB, InstrumentDB};
pub use repository::ReferenceRepository;
