//! Pull candidate question/answer data out of the conversation stores.

mod chat;
mod ticket;

pub use chat::PgChatExtractor;
pub use ticket::PgTicketExtractor;

use crate::error::AppResult;
use crate::models::{DataSource, DateRange, ExtractedData, ExtractionCriteria};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

const DEFAULT_LOOKBACK_DAYS: i64 = 365;
const DEFAULT_MAX_RESULTS: i64 = 100;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataExtractor: Send + Sync {
    fn source(&self) -> DataSource;

    /// All qualifying conversations matching the criteria
    async fn extract(&self, criteria: &ExtractionCriteria) -> AppResult<Vec<ExtractedData>>;

    /// A single closed conversation, regardless of age or rating filters
    async fn extract_one(&self, source_id: Uuid) -> AppResult<Vec<ExtractedData>>;
}

pub(crate) fn effective_range(criteria: &ExtractionCriteria) -> DateRange {
    criteria.date_range.unwrap_or_else(|| {
        let end = Utc::now();
        DateRange {
            start: end - Duration::days(DEFAULT_LOOKBACK_DAYS),
            end,
        }
    })
}

pub(crate) fn effective_limit(criteria: &ExtractionCriteria) -> i64 {
    criteria.max_results.filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_RESULTS)
}
