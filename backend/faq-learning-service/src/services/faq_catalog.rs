//! Read side of the knowledge base: what customers and agents see once an
//! entry has been published.

use crate::error::{AppError, AppResult, ResultExt};
use crate::models::{FaqEntryStatus, LearnedFaqEntry};
use crate::repository::{FaqEntryFilter, FaqEntryRepository, SortField, SortOrder};
use crate::services::review::CategoryCount;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_LIST_SIZE: i64 = 10;
const MAX_CATEGORIES: i64 = 50;

/// Public projection of an entry; review bookkeeping and generation metadata
/// stay internal
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedFaq {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    pub category: String,
    pub keywords: Vec<String>,
    pub status: FaqEntryStatus,
    pub helpful_count: i32,
    pub not_helpful_count: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<LearnedFaqEntry> for PublishedFaq {
    fn from(entry: LearnedFaqEntry) -> Self {
        Self {
            id: entry.id,
            question: entry.question,
            answer: entry.answer,
            category: entry.category,
            keywords: entry.keywords,
            status: entry.status,
            helpful_count: entry.helpful_count,
            not_helpful_count: entry.not_helpful_count,
            published_at: entry.published_at,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FaqSearchQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqSearchPage {
    pub items: Vec<PublishedFaq>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub has_next: bool,
}

pub struct FaqCatalogService {
    faqs: Arc<dyn FaqEntryRepository>,
}

impl FaqCatalogService {
    pub fn new(faqs: Arc<dyn FaqEntryRepository>) -> Self {
        Self { faqs }
    }

    fn published(sort_by: SortField, limit: i64) -> FaqEntryFilter {
        FaqEntryFilter {
            status: Some(FaqEntryStatus::Published),
            sort_by,
            sort_order: SortOrder::Desc,
            limit,
            ..FaqEntryFilter::default()
        }
    }

    pub async fn search(&self, query: &FaqSearchQuery) -> AppResult<FaqSearchPage> {
        let page = query.page.filter(|p| *p > 0).unwrap_or(1);
        let limit = query
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);

        let filter = FaqEntryFilter {
            search: query
                .q
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string),
            category: query.category.clone(),
            offset: (page - 1) * limit,
            ..Self::published(SortField::HelpfulCount, limit)
        };
        let (items, total) = self
            .faqs
            .list_entries(&filter)
            .await
            .or_fail("search FAQs")?;

        Ok(FaqSearchPage {
            items: items.into_iter().map(PublishedFaq::from).collect(),
            total,
            page,
            limit,
            has_next: page * limit < total,
        })
    }

    /// Unpublished entries read as missing unless `include_unpublished`
    pub async fn get_faq(&self, id: Uuid, include_unpublished: bool) -> AppResult<PublishedFaq> {
        self.faqs
            .get_entry(id)
            .await?
            .filter(|e| include_unpublished || e.status == FaqEntryStatus::Published)
            .map(PublishedFaq::from)
            .ok_or_else(|| AppError::NotFound("FAQ".to_string()))
    }

    pub async fn categories(&self) -> AppResult<Vec<CategoryCount>> {
        Ok(self
            .faqs
            .top_categories(Some(FaqEntryStatus::Published), MAX_CATEGORIES)
            .await
            .or_fail("list FAQ categories")?
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect())
    }

    pub async fn popular(&self, limit: Option<i64>) -> AppResult<Vec<PublishedFaq>> {
        self.list(SortField::HelpfulCount, limit, "list popular FAQs").await
    }

    pub async fn recent(&self, limit: Option<i64>) -> AppResult<Vec<PublishedFaq>> {
        self.list(SortField::CreatedAt, limit, "list recent FAQs").await
    }

    async fn list(
        &self,
        sort_by: SortField,
        limit: Option<i64>,
        context: &'static str,
    ) -> AppResult<Vec<PublishedFaq>> {
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_LIST_SIZE)
            .min(MAX_PAGE_SIZE);
        let (items, _) = self
            .faqs
            .list_entries(&Self::published(sort_by, limit))
            .await
            .or_fail(context)?;
        Ok(items.into_iter().map(PublishedFaq::from).collect())
    }
}
