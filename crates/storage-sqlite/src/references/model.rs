//! Database models for instruments and groupings.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::warn;
use tradesync_core::references::{Grouping, Instrument, InstrumentStatus};

fn to_unix(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(|t| t.timestamp())
}

fn from_unix(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

fn tags_to_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn tags_from_json(id: &str, raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Ignoring malformed tags for {}: {}", id, e);
        Vec::new()
    })
}

#[derive(
    Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone, PartialEq,
)]
#[diesel(table_name = crate::schema::instruments)]
#[diesel(primary_key(instrument_id))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct InstrumentDB {
    pub instrument_id: String,
    pub grouping_id: Option<String>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub winning_outcome_id: Option<String>,
    pub winning_outcome_label: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub close_time: Option<i64>,
    pub completed_time: Option<i64>,
    pub tags: String,
    pub volume_total: Option<f64>,
    pub liquidity: Option<f64>,
    pub last_updated: String,
}

impl InstrumentDB {
    pub fn new(instrument: Instrument, last_updated: &str) -> Self {
        Self {
            tags: tags_to_json(&instrument.tags),
            status: instrument.status.as_str().to_string(),
            instrument_id: instrument.instrument_id,
            grouping_id: instrument.grouping_id,
            slug: instrument.slug,
            title: instrument.title,
            description: instrument.description,
            winning_outcome_id: instrument.winning_outcome_id,
            winning_outcome_label: instrument.winning_outcome_label,
            start_time: to_unix(instrument.start_time),
            end_time: to_unix(instrument.end_time),
            close_time: to_unix(instrument.close_time),
            completed_time: to_unix(instrument.completed_time),
            volume_total: instrument.volume_total,
            liquidity: instrument.liquidity,
            last_updated: last_updated.to_string(),
        }
    }
}

impl From<InstrumentDB> for Instrument {
    fn from(row: InstrumentDB) -> Self {
        Instrument {
            tags: tags_from_json(&row.instrument_id, &row.tags),
            status: InstrumentStatus::from(row.status),
            instrument_id: row.instrument_id,
            grouping_id: row.grouping_id,
            slug: row.slug,
            title: row.title,
            description: row.description,
            winning_outcome_id: row.winning_outcome_id,
            winning_outcome_label: row.winning_outcome_label,
            start_time: from_unix(row.start_time),
            end_time: from_unix(row.end_time),
            close_time: from_unix(row.close_time),
            completed_time: from_unix(row.completed_time),
            volume_total: row.volume_total,
            liquidity: row.liquidity,
        }
    }
}

#[derive(
    Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone, PartialEq, Eq,
)]
#[diesel(table_name = crate::schema::groupings)]
#[diesel(primary_key(grouping_id))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct GroupingDB {
    pub grouping_id: String,
    pub title: Option<String>,
    pub category: Option<String>,
    pub tags: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub last_updated: String,
}

impl GroupingDB {
    pub fn new(grouping: Grouping, last_updated: &str) -> Self {
        Self {
            tags: tags_to_json(&grouping.tags),
            grouping_id: grouping.grouping_id,
            title: grouping.title,
            category: grouping.category,
            start_time: to_unix(grouping.start_time),
            end_time: to_unix(grouping.end_time),
            last_updated: last_updated.to_string(),
        }
    }
}

impl From<GroupingDB> for Grouping {
    fn from(row: GroupingDB) -> Self {
        Grouping {
            tags: tags_from_json(&row.grouping_id, &row.tags),
            grouping_id: row.grouping_id,
            title: row.title,
            category: row.category,
            start_time: from_unix(row.start_time),
            end_time: from_unix(row.end_time),
        }
    }
}
