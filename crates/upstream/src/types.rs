//! Wire types of the upstream read API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tradesync_core::references::{Instrument, InstrumentStatus};
use tradesync_core::transactions::{SourceTransaction, TransactionPage};

/// `GET /accounts/{id}/transactions`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsResponse {
    #[serde(default)]
    pub records: Vec<SourceTransaction>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub has_more: bool,
    pub continuation_token: Option<String>,
}

impl From<TransactionsResponse> for TransactionPage {
    fn from(response: TransactionsResponse) -> Self {
        TransactionPage {
            records: response.records,
            has_more: response.pagination.has_more,
            continuation_token: response
                .pagination
                .continuation_token
                .filter(|token| !token.trim().is_empty()),
        }
    }
}

/// `GET /instruments?id=...`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentsResponse {
    #[serde(default)]
    pub instruments: Vec<WireInstrument>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOutcome {
    pub id: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireInstrument {
    #[serde(alias = "instrumentId")]
    pub id: Option<String>,
    pub grouping_id: Option<String>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub winning_outcome: Option<WireOutcome>,
    /// Unix seconds.
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub close_time: Option<i64>,
    pub completed_time: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub volume_total: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub liquidity: Option<f64>,
}

/// Accepts a JSON number, a numeric string, or null.
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl WireInstrument {
    /// Maps to the domain model; entries without an id are dropped.
    pub fn into_instrument(self) -> Option<Instrument> {
        let instrument_id = non_empty(self.id)?;
        let outcome = self.winning_outcome.unwrap_or_default();
        Some(Instrument {
            instrument_id,
            grouping_id: non_empty(self.grouping_id),
            slug: non_empty(self.slug),
            title: self.title,
            description: self.description,
            status: self
                .status
                .map(InstrumentStatus::from)
                .unwrap_or(InstrumentStatus::Open),
            winning_outcome_id: non_empty(outcome.id),
            winning_outcome_label: non_empty(outcome.label),
            start_time: timestamp(self.start_time),
            end_time: timestamp(self.end_time),
            close_time: timestamp(self.close_time),
            completed_time: timestamp(self.completed_time),
            tags: self
                .tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            volume_total: self.volume_total,
            liquidity: self.liquidity,
        })
    }
}

/// Error body returned by the API on failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub code: String,
    pub message: String,
}
