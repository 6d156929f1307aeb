//! Instruments and groupings referenced by transactions.

mod references_model;
mod references_traits;

pub use references_model::{groupings_from_instruments, Grouping, Instrument, InstrumentStatus};
pub use references_traits::{ReferenceRepositoryTrait, ReferenceSource};
