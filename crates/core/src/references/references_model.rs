//! Reference entities resolved from transaction foreign keys.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstrumentStatus {
    Open,
    Closed,
    Resolved,
    Other(String),
}

impl InstrumentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            InstrumentStatus::Open => "open",
            InstrumentStatus::Closed => "closed",
            InstrumentStatus::Resolved => "resolved",
            InstrumentStatus::Other(value) => value.as_str(),
        }
    }

    /// Closed and resolved instruments never change again and are not re-fetched.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstrumentStatus::Closed | InstrumentStatus::Resolved)
    }
}

impl From<String> for InstrumentStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" | "active" => InstrumentStatus::Open,
            "closed" => InstrumentStatus::Closed,
            "resolved" => InstrumentStatus::Resolved,
            other => InstrumentStatus::Other(other.to_string()),
        }
    }
}

impl From<&str> for InstrumentStatus {
    fn from(value: &str) -> Self {
        InstrumentStatus::from(value.to_string())
    }
}

impl From<InstrumentStatus> for String {
    fn from(value: InstrumentStatus) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub instrument_id: String,
    pub grouping_id: Option<String>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: InstrumentStatus,
    pub winning_outcome_id: Option<String>,
    pub winning_outcome_label: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub close_time: Option<DateTime<Utc>>,
    pub completed_time: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub volume_total: Option<f64>,
    pub liquidity: Option<f64>,
}

/// A collection of instruments sharing a grouping id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grouping {
    pub grouping_id: String,
    pub title: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// One grouping per distinct grouping id; the first instrument seen wins.
pub fn groupings_from_instruments(instruments: &[Instrument]) -> Vec<Grouping> {
    let mut seen = HashSet::new();
    instruments
        .iter()
        .filter_map(|instrument| {
            let grouping_id = instrument.grouping_id.as_deref()?.trim();
            if grouping_id.is_empty() || !seen.insert(grouping_id.to_string()) {
                return None;
            }
            Some(Grouping {
                grouping_id: grouping_id.to_string(),
                title: instrument.title.clone(),
                category: instrument.tags.first().cloned(),
                tags: instrument.tags.clone(),
                start_time: instrument.start_time,
                end_time: instrument.end_time,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(id: &str, grouping: Option<&str>, tags: &[&str]) -> Instrument {
        Instrument {
            instrument_id: id.to_string(),
            grouping_id: grouping.map(String::from),
            slug: None,
            title: Some(format!("title {}", id)),
            description: None,
            status: InstrumentStatus::Open,
            winning_outcome_id: None,
            winning_outcome_label: None,
            start_time: None,
            end_time: None,
            close_time: None,
            completed_time: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            volume_total: None,
            liquidity: None,
        }
    }

    #[test]
    fn status_parsing_is_lenient() {
        assert_eq!(InstrumentStatus::from("OPEN"), InstrumentStatus::Open);
        assert_eq!(InstrumentStatus::from("active"), InstrumentStatus::Open);
        assert!(InstrumentStatus::from("resolved").is_terminal());
        assert_eq!(
            InstrumentStatus::from("paused"),
            InstrumentStatus::Other("paused".into())
        );
        assert!(!InstrumentStatus::from("paused").is_terminal());
    }

    #[test]
    fn groupings_are_deduplicated_and_categorized() {
        let instruments = vec![
            instrument("m1", Some("e1"), &["Politics", "US"]),
            instrument("m2", Some("e1"), &["Sports"]),
            instrument("m3", Some("e2"), &[]),
            instrument("m4", None, &["Crypto"]),
        ];
        let groupings = groupings_from_instruments(&instruments);
        assert_eq!(groupings.len(), 2);
        assert_eq!(groupings[0].grouping_id, "e1");
        assert_eq!(groupings[0].category.as_deref(), Some("Politics"));
        assert_eq!(groupings[0].title.as_deref(), Some("title m1"));
        assert_eq!(groupings[1].category, None);
    }
}
