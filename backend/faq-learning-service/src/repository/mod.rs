use crate::error::AppResult;
use crate::models::{
    FaqEntrySource, FaqEntryStatus, FaqLearningConfig, LearnedFaqEntry, LearningPattern,
    PatternMatch,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryLearningStore;
pub use postgres::PgLearningStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    Confidence,
    Category,
    HelpfulCount,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::Confidence => "confidence",
            SortField::Category => "category",
            SortField::HelpfulCount => "helpful_count",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct FaqEntryFilter {
    pub status: Option<FaqEntryStatus>,
    pub min_confidence: Option<i32>,
    pub max_confidence: Option<i32>,
    pub source: Option<FaqEntrySource>,
    pub category: Option<String>,
    /// Case-insensitive substring of the question or answer
    pub search: Option<String>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

impl FaqEntryFilter {
    pub fn matches(&self, entry: &LearnedFaqEntry) -> bool {
        self.status.map_or(true, |s| entry.status == s)
            && self.min_confidence.map_or(true, |c| entry.confidence >= c)
            && self.max_confidence.map_or(true, |c| entry.confidence <= c)
            && self.source.map_or(true, |s| entry.source == s)
            && self
                .category
                .as_deref()
                .map_or(true, |c| entry.category == c)
            && self.search.as_deref().map_or(true, |term| {
                let term = term.to_lowercase();
                entry.question.to_lowercase().contains(&term)
                    || entry.answer.to_lowercase().contains(&term)
            })
    }
}

/// Entry counts split at 85 and 60
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceBuckets {
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

#[async_trait]
pub trait FaqEntryRepository: Send + Sync {
    /// Insert all entries atomically
    async fn insert_entries(&self, entries: &[LearnedFaqEntry]) -> AppResult<()>;

    async fn get_entry(&self, id: Uuid) -> AppResult<Option<LearnedFaqEntry>>;

    async fn update_entry(&self, entry: &LearnedFaqEntry) -> AppResult<()>;

    /// Returns: (page, total matching rows)
    async fn list_entries(
        &self,
        filter: &FaqEntryFilter,
    ) -> AppResult<(Vec<LearnedFaqEntry>, i64)>;

    /// Whether this source already produced an entry for the same question
    async fn source_already_learned(
        &self,
        source: FaqEntrySource,
        source_id: Uuid,
        content_hash: &str,
    ) -> AppResult<bool>;

    async fn count_by_status(&self) -> AppResult<HashMap<FaqEntryStatus, i64>>;

    async fn count_created_since(
        &self,
        since: DateTime<Utc>,
        status: Option<FaqEntryStatus>,
        source: Option<FaqEntrySource>,
    ) -> AppResult<i64>;

    async fn average_confidence(&self, status: Option<FaqEntryStatus>) -> AppResult<f64>;

    async fn confidence_buckets(&self) -> AppResult<ConfidenceBuckets>;

    async fn recent_entries(&self, limit: i64) -> AppResult<Vec<LearnedFaqEntry>>;

    /// Returns: (category, count) ordered by count
    async fn top_categories(
        &self,
        status: Option<FaqEntryStatus>,
        limit: i64,
    ) -> AppResult<Vec<(String, i64)>>;
}

#[async_trait]
pub trait PatternRepository: Send + Sync {
    /// Create the pattern or merge sources into it; frequency grows by the new sightings
    async fn upsert_pattern(&self, pattern: &PatternMatch) -> AppResult<LearningPattern>;

    async fn count_patterns(&self, min_frequency: i32) -> AppResult<i64>;
}

#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Active rows only
    async fn list_config(&self) -> AppResult<Vec<FaqLearningConfig>>;

    async fn get_config(&self, key: &str) -> AppResult<Option<FaqLearningConfig>>;

    async fn upsert_config(&self, key: &str, value: &Value) -> AppResult<()>;
}

#[async_trait]
pub trait PipelineStateRepository: Send + Sync {
    /// Take the named lease if it is free or expired
    async fn try_acquire_lease(&self, name: &str, holder: Uuid, ttl_secs: i64)
        -> AppResult<bool>;

    /// Push the expiry out again; false once another holder owns the lease
    async fn renew_lease(&self, name: &str, holder: Uuid, ttl_secs: i64) -> AppResult<bool>;

    async fn release_lease(&self, name: &str, holder: Uuid) -> AppResult<()>;

    async fn daily_processed(&self, day: NaiveDate) -> AppResult<i64>;

    /// Returns the new total for the day
    async fn add_daily_processed(&self, day: NaiveDate, count: i64) -> AppResult<i64>;
}

/// Storage handles shared by the services
#[derive(Clone)]
pub struct Repositories {
    pub faqs: Arc<dyn FaqEntryRepository>,
    pub patterns: Arc<dyn PatternRepository>,
    pub config: Arc<dyn ConfigRepository>,
    pub pipeline_state: Arc<dyn PipelineStateRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgLearningStore::new(pool));
        Self {
            faqs: store.clone(),
            patterns: store.clone(),
            config: store.clone(),
            pipeline_state: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryLearningStore::default()))
    }

    pub fn from_store(store: Arc<InMemoryLearningStore>) -> Self {
        Self {
            faqs: store.clone(),
            patterns: store.clone(),
            config: store.clone(),
            pipeline_state: store,
        }
    }
}
