use crate::error::{AppError, AppResult, ResultExt};
use crate::models::{FaqEdits, FaqEntrySource, FaqEntryStatus, LearnedFaqEntry};
use crate::repository::{FaqEntryFilter, FaqEntryRepository, SortField, SortOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const MAX_BULK_REVIEW: usize = 100;
const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
const TOP_CATEGORIES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl ReviewAction {
    pub fn target_status(&self) -> FaqEntryStatus {
        match self {
            ReviewAction::Approve => FaqEntryStatus::Published,
            ReviewAction::Reject => FaqEntryStatus::Rejected,
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "approved",
            ReviewAction::Reject => "rejected",
        }
    }
}

/// Queue filters; status defaults to pending review
#[derive(Debug, Clone, Default)]
pub struct ReviewQueueQuery {
    pub status: Option<FaqEntryStatus>,
    pub min_confidence: Option<i32>,
    pub max_confidence: Option<i32>,
    pub source: Option<FaqEntrySource>,
    pub category: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueuePage {
    pub items: Vec<LearnedFaqEntry>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub action: ReviewAction,
    pub reviewer_id: Uuid,
    pub reason: Option<String>,
    pub edits: Option<FaqEdits>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReviewFailure {
    pub faq_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReviewResult {
    pub successful: Vec<Uuid>,
    pub failed: Vec<BulkReviewFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    pub total: i64,
    pub pending_review: i64,
    pub published: i64,
    pub rejected: i64,
    pub average_confidence: i64,
    pub top_categories: Vec<CategoryCount>,
}

/// Human review of generated entries
pub struct ReviewQueueService {
    faqs: Arc<dyn FaqEntryRepository>,
}

impl ReviewQueueService {
    pub fn new(faqs: Arc<dyn FaqEntryRepository>) -> Self {
        Self { faqs }
    }

    pub async fn get_review_queue(&self, query: &ReviewQueueQuery) -> AppResult<ReviewQueuePage> {
        let page = query.page.filter(|p| *p > 0).unwrap_or(1);
        let limit = query
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);

        let filter = FaqEntryFilter {
            status: Some(query.status.unwrap_or(FaqEntryStatus::PendingReview)),
            min_confidence: query.min_confidence,
            max_confidence: query.max_confidence,
            source: query.source,
            category: query.category.clone(),
            search: None,
            sort_by: query.sort_by.unwrap_or_default(),
            sort_order: query.sort_order.unwrap_or_default(),
            limit,
            offset: (page - 1) * limit,
        };
        let (items, total) = self
            .faqs
            .list_entries(&filter)
            .await
            .or_fail("get review queue")?;

        let total_pages = (total + limit - 1) / limit;
        Ok(ReviewQueuePage {
            items,
            total,
            page,
            limit,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        })
    }

    pub async fn review_faq(
        &self,
        faq_id: Uuid,
        decision: ReviewDecision,
    ) -> AppResult<LearnedFaqEntry> {
        let mut entry = self
            .faqs
            .get_entry(faq_id)
            .await?
            .ok_or_else(|| AppError::NotFound("FAQ".to_string()))?;

        entry.review(
            decision.reviewer_id,
            decision.action.target_status(),
            decision.reason,
            decision.edits,
        )?;

        self.faqs.update_entry(&entry).await.or_fail("review FAQ")?;
        info!(
            faq_id = %faq_id,
            reviewer_id = %decision.reviewer_id,
            status = entry.status.as_str(),
            "FAQ reviewed"
        );
        Ok(entry)
    }

    /// Each id is reviewed independently; one failure does not stop the rest
    pub async fn bulk_review(
        &self,
        faq_ids: &[Uuid],
        action: ReviewAction,
        reviewer_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<BulkReviewResult> {
        if faq_ids.is_empty() {
            return Err(AppError::BadRequest("No FAQ IDs provided".to_string()));
        }
        if faq_ids.len() > MAX_BULK_REVIEW {
            return Err(AppError::BadRequest(format!(
                "Maximum {MAX_BULK_REVIEW} FAQs can be reviewed at once"
            )));
        }

        let mut result = BulkReviewResult::default();
        for &faq_id in faq_ids {
            let decision = ReviewDecision {
                action,
                reviewer_id,
                reason: reason.clone(),
                edits: None,
            };
            match self.review_faq(faq_id, decision).await {
                Ok(_) => result.successful.push(faq_id),
                Err(e) => {
                    warn!(faq_id = %faq_id, error = %e, "Bulk review failed for FAQ");
                    result.failed.push(BulkReviewFailure {
                        faq_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            successful = result.successful.len(),
            failed = result.failed.len(),
            "Bulk review completed"
        );
        Ok(result)
    }

    pub async fn review_stats(&self) -> AppResult<ReviewStats> {
        let counts = self.faqs.count_by_status().await.or_fail("get review stats")?;
        let count = |status: FaqEntryStatus| counts.get(&status).copied().unwrap_or(0);
        let average = self
            .faqs
            .average_confidence(None)
            .await
            .or_fail("get review stats")?;
        let top_categories = self
            .faqs
            .top_categories(None, TOP_CATEGORIES)
            .await
            .or_fail("get review stats")?
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect();

        Ok(ReviewStats {
            total: counts.values().sum(),
            pending_review: count(FaqEntryStatus::PendingReview),
            published: count(FaqEntryStatus::Published),
            rejected: count(FaqEntryStatus::Rejected),
            average_confidence: average.round() as i64,
            top_categories,
        })
    }
}
