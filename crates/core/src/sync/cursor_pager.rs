//! Drives the fetch loop for one account over the upstream pagination contract.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use crate::errors::{Error, Result};
use crate::transactions::{PageCursor, PageRequest, SourceTransaction, TransactionSource};

/// Lazy, finite, single-use page sequence for one account.
///
/// Offsets are sent while they stay within `offset_limit`. Once the upstream
/// hands out a continuation token, the token is used for every following
/// page. More pages beyond the offset limit without a token is a protocol
/// error for the account and ends the sequence.
pub struct CursorPager {
    source: Arc<dyn TransactionSource>,
    account_id: String,
    since: Option<DateTime<Utc>>,
    page_size: u32,
    offset_limit: u32,
    next: Option<PageCursor>,
    pages_fetched: usize,
}

impl CursorPager {
    pub fn new(
        source: Arc<dyn TransactionSource>,
        account_id: impl Into<String>,
        since: Option<DateTime<Utc>>,
        page_size: u32,
        offset_limit: u32,
    ) -> Self {
        Self {
            source,
            account_id: account_id.into(),
            since,
            page_size: page_size.max(1),
            offset_limit,
            next: Some(PageCursor::Offset(0)),
            pages_fetched: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Next page of raw records, or `None` once the sequence is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<SourceTransaction>>> {
        let Some(cursor) = self.next.take() else {
            return Ok(None);
        };

        let request = PageRequest {
            account_id: self.account_id.clone(),
            since: self.since,
            limit: self.page_size,
            cursor: cursor.clone(),
        };
        let page = self.source.fetch_page(&request).await?;
        self.pages_fetched += 1;

        let count = page.records.len();
        debug!(
            "Fetched page {} for {} ({:?}): {} records, has_more={}",
            self.pages_fetched, self.account_id, cursor, count, page.has_more
        );

        if count == 0 {
            return Ok(None);
        }
        if !page.has_more {
            return Ok(Some(page.records));
        }

        self.next = Some(self.advance(cursor, count, page.continuation_token)?);
        Ok(Some(page.records))
    }

    fn advance(
        &self,
        cursor: PageCursor,
        count: usize,
        token: Option<String>,
    ) -> Result<PageCursor> {
        let token = token.filter(|t| !t.is_empty());
        match (cursor, token) {
            (PageCursor::Token(previous), Some(token)) if previous == token => Err(
                Error::protocol(&self.account_id, "continuation token did not advance"),
            ),
            (_, Some(token)) => Ok(PageCursor::Token(token)),
            (PageCursor::Token(_), None) => Err(Error::protocol(
                &self.account_id,
                "more pages reported without a continuation token",
            )),
            (PageCursor::Offset(offset), None) => {
                let next_offset = offset.saturating_add(count as u32);
                if next_offset > self.offset_limit {
                    return Err(Error::protocol(
                        &self.account_id,
                        format!(
                            "more pages at offset {} beyond limit {} without a continuation token",
                            next_offset, self.offset_limit
                        ),
                    ));
                }
                Ok(PageCursor::Offset(next_offset))
            }
        }
    }
}
