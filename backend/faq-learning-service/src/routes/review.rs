//! Review queue endpoints under `/review`

use super::{MANAGERS, STAFF};
use crate::error::{AppResult, ResultExt};
use crate::models::{FaqEdits, FaqEntrySource, FaqEntryStatus};
use crate::repository::{SortField, SortOrder};
use crate::services::review::{ReviewAction, ReviewDecision, ReviewQueueQuery, MAX_BULK_REVIEW};
use crate::state::AppState;
use actix_middleware::{AuthenticatedUser, RequireRoles};
use actix_web::{web, HttpResponse, Scope};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

// ============================================
// Request DTOs
// ============================================

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewQueueParams {
    pub status: Option<FaqEntryStatus>,
    #[validate(range(min = 0, max = 100))]
    pub confidence_min: Option<i32>,
    #[validate(range(min = 0, max = 100))]
    pub confidence_max: Option<i32>,
    pub source: Option<FaqEntrySource>,
    pub category: Option<String>,
    #[validate(range(min = 1))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
}

impl From<ReviewQueueParams> for ReviewQueueQuery {
    fn from(p: ReviewQueueParams) -> Self {
        Self {
            status: p.status,
            min_confidence: p.confidence_min,
            max_confidence: p.confidence_max,
            source: p.source,
            category: p.category.filter(|c| !c.trim().is_empty()),
            page: p.page,
            limit: p.limit,
            sort_by: p.sort_by,
            sort_order: p.sort_order,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub action: ReviewAction,
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
    #[validate(length(min = 1))]
    pub edited_question: Option<String>,
    #[validate(length(min = 1))]
    pub edited_answer: Option<String>,
    #[validate(length(min = 1))]
    pub edited_category: Option<String>,
    pub edited_keywords: Option<Vec<String>>,
}

impl ReviewRequest {
    fn edits(&self) -> Option<FaqEdits> {
        let edits = FaqEdits {
            question: self.edited_question.clone(),
            answer: self.edited_answer.clone(),
            category: self.edited_category.clone(),
            keywords: self.edited_keywords.clone(),
        };
        (!edits.is_empty()).then_some(edits)
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkReviewRequest {
    #[serde(default)]
    pub faq_ids: Vec<Uuid>,
    pub action: ReviewAction,
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
}

// ============================================
// Endpoints
// ============================================

/// GET /review/queue
async fn get_review_queue(
    state: web::Data<AppState>,
    query: web::Query<ReviewQueueParams>,
) -> AppResult<HttpResponse> {
    query.validate()?;
    let page = state
        .review
        .get_review_queue(&query.into_inner().into())
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// GET /review/queue/stats
async fn get_review_stats(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let stats = state.review.review_stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}

/// POST /review/{faqId}/review
async fn review_faq(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    faq_id: web::Path<Uuid>,
    body: web::Json<ReviewRequest>,
) -> AppResult<HttpResponse> {
    body.validate()?;
    let decision = ReviewDecision {
        action: body.action,
        reviewer_id: user.id,
        reason: body.reason.clone(),
        edits: body.edits(),
    };
    let faq = state
        .review
        .review_faq(faq_id.into_inner(), decision)
        .await
        .or_fail("review FAQ")?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": format!("FAQ successfully {}", body.action.past_tense()),
        "faq": {
            "id": faq.id,
            "status": faq.status,
            "reviewedAt": faq.reviewed_at,
            "reviewedBy": faq.reviewed_by,
        },
    })))
}

/// POST /review/bulk-review
async fn bulk_review(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<BulkReviewRequest>,
) -> AppResult<HttpResponse> {
    body.validate()?;
    let body = body.into_inner();
    let results = state
        .review
        .bulk_review(&body.faq_ids, body.action, user.id, body.reason)
        .await
        .or_fail("perform bulk review")?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": format!(
            "Bulk review completed: {}/{} successful",
            results.successful.len(),
            body.faq_ids.len()
        ),
        "maxBatchSize": MAX_BULK_REVIEW,
        "results": results,
    })))
}

pub fn scope() -> Scope {
    web::scope("/review")
        .service(
            web::resource("/queue")
                .wrap(RequireRoles::any(STAFF))
                .route(web::get().to(get_review_queue)),
        )
        .service(
            web::resource("/queue/stats")
                .wrap(RequireRoles::any(MANAGERS))
                .route(web::get().to(get_review_stats)),
        )
        .service(
            web::resource("/bulk-review")
                .wrap(RequireRoles::any(MANAGERS))
                .route(web::post().to(bulk_review)),
        )
        .service(
            web::resource("/{faq_id}/review")
                .wrap(RequireRoles::any(STAFF))
                .route(web::post().to(review_faq)),
        )
}
