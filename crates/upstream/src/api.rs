//! Adapters from the upstream API to the core source traits.

use async_trait::async_trait;
use log::debug;
use tradesync_core::config::MAX_REFERENCE_BATCH_SIZE;
use tradesync_core::references::{Instrument, ReferenceSource};
use tradesync_core::transactions::{PageCursor, PageRequest, TransactionPage, TransactionSource};
use tradesync_core::{Error, Result};

use crate::client::RateLimitedClient;
use crate::types::{InstrumentsResponse, TransactionsResponse, WireInstrument};

/// The upstream read API: paginated transactions per account and batched
/// instrument lookups.
#[derive(Debug, Clone)]
pub struct UpstreamApi {
    client: RateLimitedClient,
}

impl UpstreamApi {
    pub fn new(client: RateLimitedClient) -> Self {
        Self { client }
    }

    fn transactions_path(account_id: &str) -> String {
        format!("/accounts/{}/transactions", urlencoding::encode(account_id))
    }

    fn page_query(request: &PageRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![("limit", request.limit.to_string())];
        match &request.cursor {
            PageCursor::Offset(offset) => query.push(("offset", offset.to_string())),
            PageCursor::Token(token) => query.push(("continuationToken", token.clone())),
        }
        if let Some(since) = request.since {
            query.push(("since", since.timestamp().to_string()));
        }
        query
    }
}

#[async_trait]
impl TransactionSource for UpstreamApi {
    /// GET /accounts/{id}/transactions?limit&offset|continuationToken&since
    async fn fetch_page(&self, request: &PageRequest) -> Result<TransactionPage> {
        let path = Self::transactions_path(&request.account_id);
        let response: TransactionsResponse = self
            .client
            .get_json(&path, &Self::page_query(request))
            .await
            .map_err(Error::from)?;
        Ok(response.into())
    }
}

#[async_trait]
impl ReferenceSource for UpstreamApi {
    fn max_batch_size(&self) -> usize {
        MAX_REFERENCE_BATCH_SIZE
    }

    /// GET /instruments?id=...&id=...
    async fn fetch_instruments(&self, instrument_ids: &[String]) -> Result<Vec<Instrument>> {
        if instrument_ids.is_empty() {
            return Ok(Vec::new());
        }
        if instrument_ids.len() > MAX_REFERENCE_BATCH_SIZE {
            return Err(Error::validation(format!(
                "instrument lookup of {} ids exceeds the limit of {}",
                instrument_ids.len(),
                MAX_REFERENCE_BATCH_SIZE
            )));
        }

        let query: Vec<(&str, String)> = instrument_ids
            .iter()
            .map(|id| ("id", id.clone()))
            .collect();
        let response: InstrumentsResponse = self
            .client
            .get_json("/instruments", &query)
            .await
            .map_err(Error::from)?;

        let returned = response.instruments.len();
        let instruments: Vec<Instrument> = response
            .instruments
            .into_iter()
            .filter_map(WireInstrument::into_instrument)
            .collect();
        if instruments.len() < returned {
            debug!(
                "Dropped {} instruments without an id",
                returned - instruments.len()
            );
        }
        Ok(instruments)
    }
}
