use std::collections::HashMap;

use async_trait::async_trait;

use super::references_model::{Grouping, Instrument, InstrumentStatus};
use crate::errors::Result;

/// Upstream lookup of instruments by id.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// Largest number of ids accepted by one lookup.
    fn max_batch_size(&self) -> usize;

    /// Ids the upstream does not know are simply absent from the result.
    async fn fetch_instruments(&self, instrument_ids: &[String]) -> Result<Vec<Instrument>>;
}

#[async_trait]
pub trait ReferenceRepositoryTrait: Send + Sync {
    fn instrument_statuses(&self, instrument_ids: &[String])
        -> Result<HashMap<String, InstrumentStatus>>;

    fn open_instrument_ids(&self) -> Result<Vec<String>>;

    /// Instrument ids referenced by landed transactions but never landed themselves.
    fn orphaned_instrument_ids(&self) -> Result<Vec<String>>;

    /// Upsert-merge; never regresses a terminal status back to open.
    async fn upsert_instruments(&self, instruments: Vec<Instrument>) -> Result<usize>;

    async fn upsert_groupings(&self, groupings: Vec<Grouping>) -> Result<usize>;
}
