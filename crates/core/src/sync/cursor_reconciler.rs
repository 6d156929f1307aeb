//! Chooses the lower bound of a new run from the cursor and landed data.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinceReason {
    FullBackfill,
    /// The cursor ran ahead of landed data; restart from the landed maximum.
    GapDetected,
    Cursor,
    LatestLanded,
    Lookback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinceDecision {
    pub since: Option<DateTime<Utc>>,
    pub reason: SinceReason,
}

pub fn reconcile_since(
    cursor: Option<DateTime<Utc>>,
    latest_landed: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    default_lookback: Duration,
    drift_tolerance: Duration,
    full_backfill: bool,
) -> SinceDecision {
    if full_backfill {
        return SinceDecision {
            since: None,
            reason: SinceReason::FullBackfill,
        };
    }

    let tolerance = chrono::Duration::from_std(drift_tolerance).unwrap_or(chrono::Duration::zero());
    match (cursor, latest_landed) {
        (Some(cursor), Some(latest)) if cursor - latest > tolerance => {
            warn!(
                "Sync cursor {} is ahead of latest landed record {}; resuming from landed data",
                cursor, latest
            );
            SinceDecision {
                since: Some(latest),
                reason: SinceReason::GapDetected,
            }
        }
        (Some(cursor), Some(latest)) if cursor <= latest => SinceDecision {
            since: Some(cursor),
            reason: SinceReason::Cursor,
        },
        (Some(_), Some(latest)) => SinceDecision {
            since: Some(latest),
            reason: SinceReason::LatestLanded,
        },
        (Some(cursor), None) => SinceDecision {
            since: Some(cursor),
            reason: SinceReason::Cursor,
        },
        (None, Some(latest)) => SinceDecision {
            since: Some(latest),
            reason: SinceReason::LatestLanded,
        },
        (None, None) => SinceDecision {
            // A lookback reaching past the representable range means everything.
            since: chrono::Duration::from_std(default_lookback)
                .ok()
                .and_then(|lookback| now.checked_sub_signed(lookback)),
            reason: SinceReason::Lookback,
        },
    }
}
