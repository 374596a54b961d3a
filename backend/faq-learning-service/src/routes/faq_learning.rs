//! Pipeline, dashboard, tunables and AI provider endpoints under `/faq-learning`

use super::{ADMIN, MANAGERS, STAFF};
use crate::error::{AppError, AppResult, ResultExt};
use crate::models::{DataSource, DateRange, ExtractionCriteria};
use crate::services::confidence::FeedbackKind;
use crate::services::config_service::ConfigUpdate;
use crate::services::faq_catalog::FaqSearchQuery;
use crate::state::AppState;
use actix_middleware::{AuthenticatedUser, RequireRoles};
use actix_web::{web, HttpResponse, Scope};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

// ============================================
// Request DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct DateRangeDto {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CriteriaDto {
    pub date_range: Option<DateRangeDto>,
    #[validate(range(min = 0))]
    pub min_session_duration: Option<i64>,
    #[validate(range(min = 1.0, max = 5.0))]
    pub min_satisfaction_score: Option<f64>,
    #[validate(range(min = 0))]
    pub min_resolution_time: Option<i64>,
    pub categories: Option<Vec<String>>,
    pub excluded_categories: Option<Vec<String>>,
    #[validate(range(min = 1, max = 1000))]
    pub max_results: Option<i64>,
}

impl CriteriaDto {
    fn into_criteria(self) -> AppResult<ExtractionCriteria> {
        let date_range = match self.date_range {
            Some(range) if range.from > range.to => {
                return Err(AppError::BadRequest(
                    "dateRange.from must not be after dateRange.to".to_string(),
                ))
            }
            Some(range) => Some(DateRange {
                start: range.from,
                end: range.to,
            }),
            None => None,
        };
        Ok(ExtractionCriteria {
            date_range,
            min_session_duration: self.min_session_duration,
            min_satisfaction_score: self.min_satisfaction_score,
            min_resolution_time: self.min_resolution_time,
            categories: self.categories,
            excluded_categories: self.excluded_categories,
            max_results: self.max_results,
        })
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct StartLearningRequest {
    #[validate(nested)]
    pub criteria: Option<CriteriaDto>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigRequest {
    #[validate(length(min = 1))]
    pub config_key: String,
    pub config_value: Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkUpdateConfigRequest {
    #[validate(length(min = 1, message = "At least one configuration is required"))]
    pub configs: Vec<ConfigUpdate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SwitchProviderRequest {
    #[validate(length(min = 1))]
    pub provider: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeRequest {
    pub source: DataSource,
    pub source_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub feedback_type: FeedbackKind,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FaqSearchParams {
    #[validate(length(max = 200))]
    pub q: Option<String>,
    pub category: Option<String>,
    #[validate(range(min = 1))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FaqListParams {
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
}

// ============================================
// Endpoints
// ============================================

/// An empty body means default criteria; anything else has to parse
fn parse_start_request(body: &[u8]) -> AppResult<StartLearningRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartLearningRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {e}")))
}

/// POST /faq-learning/start
///
/// Runs on its own task so a dropped connection does not cancel the run.
async fn start_learning(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let request = parse_start_request(&body)?;
    request.validate()?;
    let criteria = request
        .criteria
        .map(CriteriaDto::into_criteria)
        .transpose()?;

    info!(user_id = %user.id, "Starting FAQ learning pipeline via API");
    let learning = state.learning.clone();
    let result = tokio::spawn(async move { learning.run_learning_pipeline(criteria).await })
        .await
        .map_err(|e| AppError::Internal(format!("pipeline task aborted: {e}")))
        .and_then(|r| r)
        .or_fail("start learning pipeline")?;

    Ok(HttpResponse::Ok().json(json!({ "success": true, "result": result })))
}

/// POST /faq-learning/realtime
///
/// Called when a chat or ticket closes. A no-op while real-time processing is off.
async fn process_realtime(
    state: web::Data<AppState>,
    body: web::Json<RealtimeRequest>,
) -> AppResult<HttpResponse> {
    let RealtimeRequest { source, source_id } = body.into_inner();
    let learning = state.learning.clone();
    let result = tokio::spawn(async move { learning.process_realtime_data(source, source_id).await })
        .await
        .map_err(|e| AppError::Internal(format!("real-time task aborted: {e}")))
        .and_then(|r| r)
        .or_fail("process real-time data")?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "processed": result.is_some(),
        "result": result,
    })))
}

/// GET /faq-learning/dashboard
async fn dashboard(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let dashboard = state
        .learning
        .dashboard()
        .await
        .or_fail("get dashboard stats")?;
    Ok(HttpResponse::Ok().json(dashboard))
}

/// GET /faq-learning/status
async fn pipeline_status(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let status = state
        .learning
        .pipeline_status()
        .await
        .or_fail("get pipeline status")?;
    Ok(HttpResponse::Ok().json(status))
}

/// GET /faq-learning/config
async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let configurations = state
        .config
        .list_configs()
        .await
        .or_fail("get configuration")?;
    Ok(HttpResponse::Ok().json(json!({ "configurations": configurations })))
}

/// PUT /faq-learning/config
///
/// Shares its resource with the manager-readable GET, so the admin check is here.
async fn update_config(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<UpdateConfigRequest>,
) -> AppResult<HttpResponse> {
    if !user.has_any_role(ADMIN) {
        return Err(AppError::Forbidden);
    }
    body.validate()?;
    let stored = state
        .config
        .update_config(&body.config_key, &body.config_value)
        .await
        .or_fail("update configuration")?;

    info!(user_id = %user.id, key = %body.config_key, "Configuration updated");
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Configuration updated successfully",
        "configKey": body.config_key,
        "configValue": stored,
    })))
}

/// PUT /faq-learning/config/bulk
async fn bulk_update_config(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<BulkUpdateConfigRequest>,
) -> AppResult<HttpResponse> {
    body.validate()?;
    let response = state
        .config
        .bulk_update_configs(body.into_inner().configs)
        .await
        .or_fail("update configurations")?;

    info!(user_id = %user.id, message = %response.message, "Bulk configuration update");
    Ok(HttpResponse::Ok().json(response))
}

/// POST /faq-learning/config/reset/{section}
async fn reset_config_section(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    section: web::Path<String>,
) -> AppResult<HttpResponse> {
    let section = section.into_inner();
    let response = state
        .config
        .reset_section(&section)
        .await
        .or_fail("reset configuration section")?;

    info!(user_id = %user.id, section = %section, "Configuration section reset");
    Ok(HttpResponse::Ok().json(response))
}

/// GET /faq-learning/provider-status
async fn provider_status(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let data = state.ai.provider_status().await;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "current": state.ai.current_provider().await,
        "data": data,
    })))
}

/// POST /faq-learning/provider/switch
async fn switch_provider(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<SwitchProviderRequest>,
) -> AppResult<HttpResponse> {
    body.validate()?;
    let provider = body.provider.trim().to_lowercase();
    let switched = state
        .ai
        .switch_provider(&provider)
        .await
        .or_fail("switch AI provider")?;

    info!(user_id = %user.id, provider = %provider, switched, "AI provider switch requested");
    let message = if switched {
        format!("Switched to {provider}")
    } else {
        format!("Provider {provider} is unknown or unavailable")
    };
    Ok(HttpResponse::Ok().json(json!({
        "success": switched,
        "message": message,
        "current": state.ai.current_provider().await,
    })))
}

/// POST /faq-learning/faqs/{id}/feedback
async fn submit_feedback(
    state: web::Data<AppState>,
    faq_id: web::Path<Uuid>,
    body: web::Json<FeedbackRequest>,
) -> AppResult<HttpResponse> {
    let entry = state
        .learning
        .record_feedback(faq_id.into_inner(), body.feedback_type)
        .await
        .or_fail("record feedback")?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "faqId": entry.id,
        "confidence": entry.confidence,
        "helpfulCount": entry.helpful_count,
        "notHelpfulCount": entry.not_helpful_count,
    })))
}

/// GET /faq-learning/faqs/search
async fn search_faqs(
    state: web::Data<AppState>,
    query: web::Query<FaqSearchParams>,
) -> AppResult<HttpResponse> {
    query.validate()?;
    let FaqSearchParams {
        q,
        category,
        page,
        limit,
    } = query.into_inner();
    let page = state
        .catalog
        .search(&FaqSearchQuery {
            q,
            category: category.filter(|c| !c.trim().is_empty()),
            page,
            limit,
        })
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// GET /faq-learning/faqs/categories
async fn faq_categories(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let categories = state.catalog.categories().await?;
    Ok(HttpResponse::Ok().json(json!({ "categories": categories })))
}

/// GET /faq-learning/faqs/popular
async fn popular_faqs(
    state: web::Data<AppState>,
    query: web::Query<FaqListParams>,
) -> AppResult<HttpResponse> {
    query.validate()?;
    let faqs = state.catalog.popular(query.limit).await?;
    Ok(HttpResponse::Ok().json(json!({ "faqs": faqs })))
}

/// GET /faq-learning/faqs/recent
async fn recent_faqs(
    state: web::Data<AppState>,
    query: web::Query<FaqListParams>,
) -> AppResult<HttpResponse> {
    query.validate()?;
    let faqs = state.catalog.recent(query.limit).await?;
    Ok(HttpResponse::Ok().json(json!({ "faqs": faqs })))
}

/// GET /faq-learning/faqs/{id}
///
/// Staff can open entries that are still in review; everyone else only sees
/// published ones.
async fn get_faq(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    faq_id: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let faq = state
        .catalog
        .get_faq(faq_id.into_inner(), user.has_any_role(STAFF))
        .await?;
    Ok(HttpResponse::Ok().json(faq))
}

pub fn scope() -> Scope {
    web::scope("/faq-learning")
        .service(
            web::resource("/start")
                .wrap(RequireRoles::any(MANAGERS))
                .route(web::post().to(start_learning)),
        )
        .service(
            web::resource("/realtime")
                .wrap(RequireRoles::any(MANAGERS))
                .route(web::post().to(process_realtime)),
        )
        .service(
            web::resource("/dashboard")
                .wrap(RequireRoles::any(STAFF))
                .route(web::get().to(dashboard)),
        )
        .service(
            web::resource("/status")
                .wrap(RequireRoles::any(STAFF))
                .route(web::get().to(pipeline_status)),
        )
        .service(
            web::resource("/config")
                .wrap(RequireRoles::any(MANAGERS))
                .route(web::get().to(get_config))
                .route(web::put().to(update_config)),
        )
        .service(
            web::resource("/config/bulk")
                .wrap(RequireRoles::any(ADMIN))
                .route(web::put().to(bulk_update_config)),
        )
        .service(
            web::resource("/config/reset/{section}")
                .wrap(RequireRoles::any(ADMIN))
                .route(web::post().to(reset_config_section)),
        )
        .service(
            web::resource("/provider-status")
                .wrap(RequireRoles::any(STAFF))
                .route(web::get().to(provider_status)),
        )
        .service(
            web::resource("/provider/switch")
                .wrap(RequireRoles::any(ADMIN))
                .route(web::post().to(switch_provider)),
        )
        .service(web::resource("/faqs/search").route(web::get().to(search_faqs)))
        .service(web::resource("/faqs/categories").route(web::get().to(faq_categories)))
        .service(web::resource("/faqs/popular").route(web::get().to(popular_faqs)))
        .service(web::resource("/faqs/recent").route(web::get().to(recent_faqs)))
        .service(web::resource("/faqs/{id}").route(web::get().to(get_faq)))
        .service(web::resource("/faqs/{id}/feedback").route(web::post().to(submit_feedback)))
}
