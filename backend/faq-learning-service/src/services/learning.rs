// ============================================
// FAQ learning pipeline
// ============================================
//
// extract -> normalize -> cluster into patterns -> score -> generate with AI
// (only at or above MIN_CONFIDENCE_FOR_AI) -> persist entries as published or
// pending review.
//
// Only one run may be in flight. An in-process flag rejects concurrent calls
// on this instance and a lease row with an expiry rejects runs on other
// instances; both are released on every exit path.

use crate::error::{AppError, AppResult, ResultExt};
use crate::metrics::METRICS;
use crate::models::{
    DataSource, DateRange, ExtractionCriteria, FaqEntrySource, FaqEntryStatus, LearnedFaqEntry,
    LearningSettings, NormalizedItem, PatternMatch,
};
use crate::repository::{ConfidenceBuckets, Repositories};
use crate::services::ai::{FaqAiService, FaqGenerationRequest, ProviderStatus};
use crate::services::batch_processor::{build_criteria, BatchProcessor};
use crate::services::confidence::{
    adjust_for_feedback, ConfidenceCalculator, FeedbackKind, MIN_CONFIDENCE_FOR_AI,
};
use crate::services::config_service::{LearningConfigService, SystemStatus};
use crate::services::normalizer;
use crate::services::pattern_recognition::{identify_patterns, pattern_hash};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const PIPELINE_LEASE: &str = "faq_learning_pipeline";
const RECENT_ACTIVITY_LIMIT: i64 = 10;
const PROGRESS_WINDOW_DAYS: i64 = 7;
const DEFAULT_SCHEDULE_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Completed,
    Partial,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Completed => "completed",
            PipelineStatus::Partial => "partial",
            PipelineStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPipelineResult {
    /// Raw items returned by the extractors
    pub extracted_items: usize,
    /// Items that passed normalization and fit the daily budget
    pub processed_items: usize,
    pub new_faqs: usize,
    pub published: usize,
    pub pending_review: usize,
    pub updated_patterns: usize,
    pub skipped_low_confidence: usize,
    pub skipped_duplicates: usize,
    pub processing_time_ms: u64,
    pub errors: Vec<String>,
    pub status: PipelineStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusView {
    pub is_processing: bool,
    pub daily_processing_count: i64,
    pub daily_processing_limit: i64,
    pub last_run: Option<SystemStatus>,
    pub next_scheduled_run: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_faqs: i64,
    pub new_faqs_today: i64,
    pub pending_review: i64,
    pub average_confidence: i64,
    pub recurring_patterns: i64,
    pub processing_status: &'static str,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningProgress {
    pub from_chat: i64,
    pub from_tickets: i64,
    pub from_suggestions: i64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub high_confidence: i64,
    pub medium_confidence: i64,
    pub low_confidence: i64,
}

impl From<ConfidenceBuckets> for QualityMetrics {
    fn from(buckets: ConfidenceBuckets) -> Self {
        Self {
            high_confidence: buckets.high,
            medium_confidence: buckets.medium,
            low_confidence: buckets.low,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub stats: DashboardStats,
    pub learning_progress: LearningProgress,
    pub quality_metrics: QualityMetrics,
    pub providers: Vec<ProviderStatus>,
    pub recent_activity: Vec<RecentActivity>,
}

/// Holds the in-process running flag; clears it when dropped
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct ItemOutcome {
    processed: usize,
    entries: Vec<LearnedFaqEntry>,
    updated_patterns: usize,
    skipped_low_confidence: usize,
    skipped_duplicates: usize,
}

pub struct FaqLearningService {
    repos: Repositories,
    config: Arc<LearningConfigService>,
    ai: Arc<FaqAiService>,
    batch: BatchProcessor,
    calculator: ConfidenceCalculator,
    processing: AtomicBool,
    lease_ttl_secs: i64,
}

impl FaqLearningService {
    pub fn new(
        repos: Repositories,
        config: Arc<LearningConfigService>,
        ai: Arc<FaqAiService>,
        batch: BatchProcessor,
        lease_ttl_secs: i64,
    ) -> Self {
        Self {
            repos,
            config,
            ai,
            batch,
            calculator: ConfidenceCalculator::default(),
            processing: AtomicBool::new(false),
            lease_ttl_secs,
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Runs `work` holding both the local flag and the shared lease
    async fn exclusive<T, Fut>(&self, work: impl FnOnce() -> Fut) -> AppResult<T>
    where
        Fut: Future<Output = AppResult<T>>,
    {
        let _guard = ProcessingGuard::acquire(&self.processing)
            .ok_or(AppError::PipelineAlreadyRunning)?;

        let holder = Uuid::new_v4();
        if !self
            .repos
            .pipeline_state
            .try_acquire_lease(PIPELINE_LEASE, holder, self.lease_ttl_secs)
            .await?
        {
            warn!("Learning pipeline lease is held by another instance");
            return Err(AppError::PipelineAlreadyRunning);
        }

        let result = tokio::select! {
            result = work() => result,
            lost = self.hold_lease(holder) => Err(lost),
        };

        if let Err(e) = self
            .repos
            .pipeline_state
            .release_lease(PIPELINE_LEASE, holder)
            .await
        {
            error!(error = %e, "Failed to release learning pipeline lease");
        }
        result
    }

    /// Keeps extending the lease while a run is in flight. Only returns once
    /// another holder owns it, so the run can be abandoned.
    async fn hold_lease(&self, holder: Uuid) -> AppError {
        let period = StdDuration::from_millis(self.lease_ttl_secs.max(1) as u64 * 1000 / 3);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self
                .repos
                .pipeline_state
                .renew_lease(PIPELINE_LEASE, holder, self.lease_ttl_secs)
                .await
            {
                Ok(true) => debug!("Learning pipeline lease renewed"),
                Ok(false) => {
                    error!("Learning pipeline lease was taken over, abandoning run");
                    return AppError::Internal("learning pipeline lease lost".to_string());
                }
                Err(e) => warn!(error = %e, "Failed to renew learning pipeline lease"),
            }
        }
    }

    pub async fn run_learning_pipeline(
        &self,
        criteria: Option<ExtractionCriteria>,
    ) -> AppResult<LearningPipelineResult> {
        self.exclusive(move || self.execute_pipeline(criteria, None))
            .await
    }

    /// `window_end` is set for scheduled runs; a completed one advances the
    /// scheduled watermark to it
    async fn execute_pipeline(
        &self,
        criteria: Option<ExtractionCriteria>,
        window_end: Option<DateTime<Utc>>,
    ) -> AppResult<LearningPipelineResult> {
        let started = Instant::now();
        let settings = self.config.settings().await.or_fail("load learning settings")?;
        let remaining = self.remaining_daily_capacity(&settings).await?;

        info!("Starting FAQ learning pipeline");
        let criteria = build_criteria(&settings, criteria);
        let extraction = self.batch.extract_all(&criteria).await;
        let sources_failed = extraction.all_sources_failed();
        let extracted = extraction.items.len();
        let mut errors = extraction.errors;

        let mut items = normalizer::normalize(extraction.items, &settings);
        if items.len() as i64 > remaining {
            warn!(
                available = items.len(),
                remaining, "Daily processing limit truncates this batch"
            );
            items.truncate(remaining as usize);
        }

        let result = self
            .process_items(items, extracted, &settings, &mut errors, started, sources_failed)
            .await;
        self.record_run(&result, window_end).await;
        Ok(result)
    }

    async fn remaining_daily_capacity(&self, settings: &LearningSettings) -> AppResult<i64> {
        let today = Utc::now().date_naive();
        let processed = self
            .repos
            .pipeline_state
            .daily_processed(today)
            .await
            .or_fail("read daily processing counter")?;
        let limit = settings.max_daily_processing_limit;
        if processed >= limit {
            warn!(processed, limit, "Daily processing limit reached");
            return Err(AppError::DailyLimitReached { processed, limit });
        }
        Ok(limit - processed)
    }

    /// Score, generate and persist a normalized batch
    async fn process_items(
        &self,
        items: Vec<NormalizedItem>,
        extracted: usize,
        settings: &LearningSettings,
        errors: &mut Vec<String>,
        started: Instant,
        sources_failed: bool,
    ) -> LearningPipelineResult {
        let outcome = self.generate_entries(&items, settings, errors).await;

        let mut saved = 0;
        let mut save_failed = false;
        if !outcome.entries.is_empty() {
            match self.repos.faqs.insert_entries(&outcome.entries).await {
                Ok(()) => saved = outcome.entries.len(),
                Err(e) => {
                    error!(error = %e, "Failed to save learned FAQ entries");
                    errors.push(format!("Failed to save FAQ entries: {}", e));
                    save_failed = true;
                }
            }
        }

        // Already-learned sources cost nothing against the daily budget
        let charged = outcome.processed - outcome.skipped_duplicates;
        if charged > 0 {
            let today = Utc::now().date_naive();
            if let Err(e) = self
                .repos
                .pipeline_state
                .add_daily_processed(today, charged as i64)
                .await
            {
                warn!(error = %e, "Failed to update daily processing counter");
                errors.push(format!("Failed to update daily counter: {}", e));
            }
        }

        let count_status = |status: FaqEntryStatus| {
            if save_failed {
                0
            } else {
                outcome.entries.iter().filter(|e| e.status == status).count()
            }
        };
        let published = count_status(FaqEntryStatus::Published);
        let pending_review = count_status(FaqEntryStatus::PendingReview);

        let status = if sources_failed || save_failed {
            PipelineStatus::Failed
        } else if !errors.is_empty() {
            PipelineStatus::Partial
        } else {
            PipelineStatus::Completed
        };

        let elapsed = started.elapsed();
        METRICS.pipeline_runs.with_label_values(&[status.as_str()]).inc();
        METRICS.pipeline_duration_seconds.observe(elapsed.as_secs_f64());
        METRICS.items_processed.inc_by(outcome.processed as u64);
        METRICS
            .faqs_generated
            .with_label_values(&["published"])
            .inc_by(published as u64);
        METRICS
            .faqs_generated
            .with_label_values(&["pending_review"])
            .inc_by(pending_review as u64);

        info!(
            processed = outcome.processed,
            new_faqs = saved,
            published,
            patterns = outcome.updated_patterns,
            errors = errors.len(),
            status = status.as_str(),
            "Learning pipeline finished"
        );

        LearningPipelineResult {
            extracted_items: extracted,
            processed_items: outcome.processed,
            new_faqs: saved,
            published,
            pending_review,
            updated_patterns: outcome.updated_patterns,
            skipped_low_confidence: outcome.skipped_low_confidence,
            skipped_duplicates: outcome.skipped_duplicates,
            processing_time_ms: elapsed.as_millis() as u64,
            errors: std::mem::take(errors),
            status,
        }
    }

    async fn generate_entries(
        &self,
        items: &[NormalizedItem],
        settings: &LearningSettings,
        errors: &mut Vec<String>,
    ) -> ItemOutcome {
        let mut outcome = ItemOutcome::default();
        let patterns = identify_patterns(items, settings.similarity_threshold);

        // item id -> (stored frequency, pattern)
        let mut by_item: HashMap<&str, (usize, &PatternMatch)> = HashMap::new();
        for pattern in &patterns {
            let frequency = match self.repos.patterns.upsert_pattern(pattern).await {
                Ok(stored) => {
                    outcome.updated_patterns += 1;
                    stored.frequency.max(1) as usize
                }
                Err(e) => {
                    warn!(pattern_hash = %pattern.pattern_hash, error = %e, "Failed to save pattern");
                    errors.push(format!("Failed to save pattern {}: {}", pattern.pattern_hash, e));
                    pattern.frequency
                }
            };
            for source in &pattern.sources {
                by_item.insert(source.item_id.as_str(), (frequency, pattern));
            }
        }

        let mut seen: HashSet<(Uuid, String)> = HashSet::new();
        for item in items {
            outcome.processed += 1;
            let Some(&(frequency, pattern)) = by_item.get(item.id.as_str()) else {
                continue;
            };

            let source = FaqEntrySource::from(item.source);
            let content_hash = pattern_hash(&item.question);
            if !seen.insert((item.source_id, content_hash.clone())) {
                outcome.skipped_duplicates += 1;
                continue;
            }
            match self
                .repos
                .faqs
                .source_already_learned(source, item.source_id, &content_hash)
                .await
            {
                Ok(true) => {
                    debug!(item_id = %item.id, "Source already learned");
                    outcome.skipped_duplicates += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    errors.push(format!("Failed to check {} for duplicates: {}", item.id, e));
                    continue;
                }
            }

            let initial = self
                .calculator
                .calculate_confidence(item, frequency, 0.0, None, settings);
            if initial.overall_confidence < MIN_CONFIDENCE_FOR_AI {
                debug!(
                    item_id = %item.id,
                    confidence = initial.overall_confidence,
                    "Below AI threshold, skipping"
                );
                outcome.skipped_low_confidence += 1;
                continue;
            }

            let request = FaqGenerationRequest {
                context: format!(
                    "Question: {}\nContext: {}",
                    item.question,
                    item.context.as_deref().unwrap_or("none")
                ),
                question_pattern: Some(item.question.clone()),
                answer_pattern: item.answer.clone(),
                temperature: settings.temperature,
                max_tokens: settings.max_tokens,
            };
            let generated = match self.ai.generate_faq_answer(&request).await {
                Ok(generated) => generated,
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "FAQ generation failed");
                    errors.push(format!("Failed to generate FAQ for {}: {}", item.id, e));
                    continue;
                }
            };

            let scored = self.calculator.calculate_confidence(
                item,
                frequency,
                0.0,
                Some(generated.confidence),
                settings,
            );
            let status = if settings.enable_auto_publishing
                && scored.overall_confidence >= settings.min_confidence_for_auto_publish
            {
                FaqEntryStatus::Published
            } else {
                FaqEntryStatus::PendingReview
            };

            let category = if generated.category.eq_ignore_ascii_case("general") {
                item.category.clone()
            } else {
                generated.category.to_lowercase()
            };
            let keywords = if generated.keywords.is_empty() {
                pattern.keywords.clone()
            } else {
                generated.keywords.clone()
            };
            let metadata = json!({
                "itemId": item.id,
                "patternHash": pattern.pattern_hash,
                "patternFrequency": frequency,
                "recurringPattern": frequency as i32 >= settings.min_pattern_frequency,
                "extractionConfidence": item.extraction_confidence,
                "initialConfidence": initial.overall_confidence,
                "baseConfidence": scored.overall_confidence,
                "confidenceFactors": scored.factors,
                "reasoning": scored.reasoning,
                "recommendation": scored.recommendation,
                "context": item.context,
                "source": item.metadata,
                "ai": {
                    "provider": generated.provider,
                    "model": generated.model,
                    "confidence": generated.confidence,
                    "processingTimeMs": generated.processing_time_ms,
                },
            });

            outcome.entries.push(LearnedFaqEntry::new(
                generated
                    .question
                    .clone()
                    .unwrap_or_else(|| item.question.clone()),
                generated.answer.clone(),
                scored.overall_confidence,
                status,
                source,
                item.source_id,
                content_hash,
                category,
                keywords,
                metadata,
            ));
        }

        outcome
    }

    async fn record_run(&self, result: &LearningPipelineResult, window_end: Option<DateTime<Utc>>) {
        let scheduled_through = match (result.status, window_end) {
            (PipelineStatus::Completed, Some(end)) => Some(end),
            _ => match self.config.system_status().await {
                Ok(previous) => previous.and_then(|s| s.scheduled_through),
                Err(e) => {
                    warn!(error = %e, "Could not read previous run status");
                    None
                }
            },
        };
        let status = SystemStatus {
            last_run_at: Utc::now(),
            last_run_status: result.status.as_str().to_string(),
            last_run_processed: result.processed_items,
            last_run_new_faqs: result.new_faqs,
            last_run_duration_ms: result.processing_time_ms,
            scheduled_through,
        };
        if let Err(e) = self.config.record_pipeline_run(&status).await {
            warn!(error = %e, "Failed to record pipeline run");
        }
    }

    /// Delay before the next scheduled run, read from `processingInterval`
    pub async fn scheduling_interval(&self) -> StdDuration {
        match self.config.settings().await {
            Ok(settings) => StdDuration::from_secs(settings.processing_interval.max(1) as u64),
            Err(e) => {
                warn!(error = %e, "Could not read processing interval, using default");
                StdDuration::from_secs(DEFAULT_SCHEDULE_SECS)
            }
        }
    }

    /// Timer entry point. The window starts where the last completed
    /// scheduled run ended, and spans at least one processing interval.
    /// Refusals are logged, never propagated.
    pub async fn scheduled_learning(&self) -> Option<LearningPipelineResult> {
        let settings = match self.config.settings().await {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "Scheduled learning could not load settings");
                return None;
            }
        };
        let scheduled_through = match self.config.system_status().await {
            Ok(status) => status.and_then(|s| s.scheduled_through),
            Err(e) => {
                warn!(error = %e, "Could not read last scheduled run");
                None
            }
        };

        let end = Utc::now();
        let interval_start = end - Duration::seconds(settings.processing_interval);
        let start = scheduled_through
            .map_or(interval_start, |through| through.min(interval_start))
            .max(end - Duration::days(settings.retention_period_days));
        let criteria = ExtractionCriteria {
            date_range: Some(DateRange { start, end }),
            max_results: Some(settings.batch_size),
            ..ExtractionCriteria::default()
        };

        let outcome = self
            .exclusive(move || self.execute_pipeline(Some(criteria), Some(end)))
            .await;
        match outcome {
            Ok(result) => Some(result),
            Err(e) if e.is_client_error() => {
                info!(reason = %e, "Scheduled learning skipped");
                None
            }
            Err(e) => {
                error!(error = %e, "Scheduled learning failed");
                None
            }
        }
    }

    /// Learn from one just-closed conversation. Returns `None` when real-time
    /// processing is switched off.
    pub async fn process_realtime_data(
        &self,
        source: DataSource,
        source_id: Uuid,
    ) -> AppResult<Option<LearningPipelineResult>> {
        let settings = self.config.settings().await.or_fail("load learning settings")?;
        if !settings.enable_real_time_processing {
            debug!(source = source.as_str(), %source_id, "Real-time processing disabled");
            return Ok(None);
        }

        let settings = &settings;
        self.exclusive(move || async move {
            let started = Instant::now();
            let remaining = self.remaining_daily_capacity(settings).await?;
            let extracted = self
                .batch
                .extractor_for(source)
                .extract_one(source_id)
                .await
                .or_fail("extract conversation")?;

            let extracted_count = extracted.len();
            let mut items = normalizer::normalize(extracted, settings);
            items.truncate(remaining.max(0) as usize);
            let mut errors = Vec::new();
            let result = self
                .process_items(items, extracted_count, settings, &mut errors, started, false)
                .await;
            info!(
                source = source.as_str(),
                %source_id,
                new_faqs = result.new_faqs,
                "Real-time learning finished"
            );
            Ok(Some(result))
        })
        .await
    }

    pub async fn pipeline_status(&self) -> AppResult<PipelineStatusView> {
        let settings = self.config.settings().await.or_fail("load learning settings")?;
        let daily = self
            .repos
            .pipeline_state
            .daily_processed(Utc::now().date_naive())
            .await
            .or_fail("read daily processing counter")?;
        let last_run = self.config.system_status().await.or_fail("read system status")?;
        let interval = Duration::seconds(settings.processing_interval);
        let next_scheduled_run = last_run
            .as_ref()
            .map(|s| s.last_run_at + interval)
            .filter(|next| *next > Utc::now())
            .unwrap_or_else(|| Utc::now() + interval);

        Ok(PipelineStatusView {
            is_processing: self.is_processing(),
            daily_processing_count: daily,
            daily_processing_limit: settings.max_daily_processing_limit,
            last_run,
            next_scheduled_run,
        })
    }

    pub async fn dashboard(&self) -> AppResult<Dashboard> {
        let settings = self.config.settings().await.or_fail("load learning settings")?;
        let status = self.pipeline_status().await?;
        let faqs = &self.repos.faqs;

        let counts = faqs.count_by_status().await.or_fail("count FAQ entries")?;
        let today = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or_else(Utc::now);
        let new_faqs_today = faqs
            .count_created_since(today, Some(FaqEntryStatus::Published), None)
            .await
            .or_fail("count today's FAQs")?;
        let average_confidence = faqs
            .average_confidence(Some(FaqEntryStatus::Published))
            .await
            .or_fail("compute average confidence")?;

        let week_ago = Utc::now() - Duration::days(PROGRESS_WINDOW_DAYS);
        let (from_chat, from_tickets, from_suggestions) = tokio::try_join!(
            faqs.count_created_since(week_ago, None, Some(FaqEntrySource::Chat)),
            faqs.count_created_since(week_ago, None, Some(FaqEntrySource::Ticket)),
            faqs.count_created_since(week_ago, None, Some(FaqEntrySource::UserSuggestion)),
        )
        .or_fail("compute learning progress")?;

        let quality_metrics = faqs
            .confidence_buckets()
            .await
            .or_fail("compute quality metrics")?;
        let recurring_patterns = self
            .repos
            .patterns
            .count_patterns(settings.min_pattern_frequency)
            .await
            .or_fail("count patterns")?;
        let recent_activity = faqs
            .recent_entries(RECENT_ACTIVITY_LIMIT)
            .await
            .or_fail("load recent activity")?
            .into_iter()
            .enumerate()
            .map(|(index, entry)| RecentActivity {
                id: format!("activity-{index}"),
                kind: "faq_generated",
                description: format!("New FAQ generated: \"{}\"", entry.question),
                timestamp: entry.created_at,
                status: if entry.status == FaqEntryStatus::Published {
                    "success"
                } else {
                    "warning"
                },
            })
            .collect();

        Ok(Dashboard {
            stats: DashboardStats {
                total_faqs: counts.get(&FaqEntryStatus::Published).copied().unwrap_or(0),
                new_faqs_today,
                pending_review: counts
                    .get(&FaqEntryStatus::PendingReview)
                    .copied()
                    .unwrap_or(0),
                average_confidence: average_confidence.round() as i64,
                recurring_patterns,
                processing_status: if status.is_processing { "running" } else { "stopped" },
                last_run: status.last_run.map(|s| s.last_run_at),
                next_run: status.next_scheduled_run,
            },
            learning_progress: LearningProgress {
                from_chat,
                from_tickets,
                from_suggestions,
            },
            quality_metrics: quality_metrics.into(),
            providers: self.ai.provider_status().await,
            recent_activity,
        })
    }

    /// Confidence is recomputed from the generated score and the running
    /// feedback totals, so repeated feedback never compounds
    pub async fn record_feedback(
        &self,
        faq_id: Uuid,
        kind: FeedbackKind,
    ) -> AppResult<LearnedFaqEntry> {
        let mut entry = self
            .repos
            .faqs
            .get_entry(faq_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("FAQ entry {faq_id}")))?;

        let base = entry
            .metadata
            .get("baseConfidence")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or(entry.confidence);
        let improved = entry
            .metadata
            .get("improvedCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        match kind {
            FeedbackKind::Helpful => entry.helpful_count += 1,
            FeedbackKind::NotHelpful => entry.not_helpful_count += 1,
            FeedbackKind::Improved => {
                if let Some(meta) = entry.metadata.as_object_mut() {
                    meta.insert("improvedCount".to_string(), json!(improved + 1));
                }
            }
        }
        let improved = if kind == FeedbackKind::Improved {
            improved + 1
        } else {
            improved
        };

        if entry.metadata.get("baseConfidence").is_none() {
            if let Some(meta) = entry.metadata.as_object_mut() {
                meta.insert("baseConfidence".to_string(), json!(base));
            }
        }

        let helpful = entry.helpful_count.max(0) as u32;
        let not_helpful = entry.not_helpful_count.max(0) as u32;
        let confidence = adjust_for_feedback(base, FeedbackKind::Helpful, helpful);
        let confidence = adjust_for_feedback(confidence, FeedbackKind::NotHelpful, not_helpful);
        entry.confidence = adjust_for_feedback(confidence, FeedbackKind::Improved, improved);
        entry.updated_at = Utc::now();

        self.repos.faqs.update_entry(&entry).await.or_fail("save feedback")?;
        info!(faq_id = %faq_id, ?kind, confidence = entry.confidence, "Recorded FAQ feedback");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::{DataExtractor, MockDataExtractor};
    use crate::models::{ExtractedData, SourceMetadata};
    use crate::repository::{FaqEntryRepository, InMemoryLearningStore, PipelineStateRepository};
    use crate::services::ai::{FaqAiProvider, GeneratedFaq, MockFaqAiProvider};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn strong_ticket() -> ExtractedData {
        let mut metadata = SourceMetadata::at(Utc::now());
        metadata.resolution_time = Some(3600);
        metadata.is_resolved = true;
        metadata.satisfaction_score = Some(5.0);
        metadata.category = Some("billing".to_string());
        ExtractedData {
            id: "ticket:strong".to_string(),
            question: "How do I update the billing address on my invoice?".to_string(),
            answer: Some(
                "1. Go to Settings and select Billing. 2. Enter the new address and save."
                    .to_string(),
            ),
            confidence: 85,
            source_id: Uuid::new_v4(),
            source: DataSource::Ticket,
            context: Some(
                "Customer moved offices last month and the old address still shows on invoices."
                    .to_string(),
            ),
            metadata,
        }
    }

    fn weak_chat() -> ExtractedData {
        let mut metadata = SourceMetadata::at(Utc::now());
        metadata.satisfaction_score = Some(1.0);
        ExtractedData {
            id: "chat:weak:0".to_string(),
            question: "Printer jammed".to_string(),
            answer: Some("Power cycle it twice okay".to_string()),
            confidence: 60,
            source_id: Uuid::new_v4(),
            source: DataSource::Chat,
            context: None,
            metadata,
        }
    }

    fn extractor(source: DataSource, items: Vec<ExtractedData>) -> Arc<dyn DataExtractor> {
        let mut mock = MockDataExtractor::new();
        mock.expect_source().return_const(source);
        mock.expect_extract().returning(move |_| Ok(items.clone()));
        Arc::new(mock)
    }

    fn billing_faq(request: &FaqGenerationRequest) -> GeneratedFaq {
        GeneratedFaq {
            question: request.question_pattern.clone(),
            answer: "Open Settings, select Billing, enter the new address and save.".to_string(),
            confidence: 90,
            keywords: vec!["billing".to_string(), "address".to_string()],
            category: "billing".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            processing_time_ms: 5,
        }
    }

    fn ai_provider(expected_calls: usize) -> Arc<dyn FaqAiProvider> {
        let mut mock = MockFaqAiProvider::new();
        mock.expect_name().return_const("openai");
        mock.expect_model().returning(|| "gpt-4o-mini".to_string());
        mock.expect_test_connection().returning(|| true);
        mock.expect_generate_faq_answer()
            .times(expected_calls)
            .returning(|request| Ok(billing_faq(request)));
        Arc::new(mock)
    }

    /// Takes a while to answer, so a run stays in flight past the lease TTL
    struct SlowProvider(StdDuration);

    #[async_trait]
    impl FaqAiProvider for SlowProvider {
        fn name(&self) -> &'static str {
            "openai"
        }

        fn model(&self) -> String {
            "gpt-4o-mini".to_string()
        }

        async fn generate_faq_answer(
            &self,
            request: &FaqGenerationRequest,
        ) -> AppResult<GeneratedFaq> {
            tokio::time::sleep(self.0).await;
            Ok(billing_faq(request))
        }

        async fn test_connection(&self) -> bool {
            true
        }
    }

    fn service_on(
        store: Arc<InMemoryLearningStore>,
        chat: Arc<dyn DataExtractor>,
        tickets: Arc<dyn DataExtractor>,
        provider: Arc<dyn FaqAiProvider>,
        lease_ttl_secs: i64,
    ) -> (Arc<LearningConfigService>, FaqLearningService) {
        let repos = Repositories::from_store(store);
        let config = Arc::new(LearningConfigService::new(repos.config.clone()));
        let ai = Arc::new(FaqAiService::new(
            vec![provider],
            "openai",
            repos.config.clone(),
        ));
        let batch = BatchProcessor::new(chat, tickets);
        let service = FaqLearningService::new(repos, config.clone(), ai, batch, lease_ttl_secs);
        (config, service)
    }

    struct Harness {
        store: Arc<InMemoryLearningStore>,
        config: Arc<LearningConfigService>,
        service: FaqLearningService,
    }

    fn harness(
        chat: Vec<ExtractedData>,
        tickets: Vec<ExtractedData>,
        expected_ai_calls: usize,
    ) -> Harness {
        let store = Arc::new(InMemoryLearningStore::default());
        let (config, service) = service_on(
            store.clone(),
            extractor(DataSource::Chat, chat),
            extractor(DataSource::Ticket, tickets),
            ai_provider(expected_ai_calls),
            60,
        );
        Harness {
            store,
            config,
            service,
        }
    }

    #[tokio::test]
    async fn test_low_confidence_items_never_reach_ai() {
        let h = harness(vec![weak_chat()], vec![], 0);

        let result = h.service.run_learning_pipeline(None).await.unwrap();
        assert_eq!(result.extracted_items, 1);
        assert_eq!(result.processed_items, 1);
        assert_eq!(result.skipped_low_confidence, 1);
        assert_eq!(result.new_faqs, 0);
        assert_eq!(result.status, PipelineStatus::Completed);
        assert!(h.store.all_entries().await.is_empty());
        assert_eq!(h.store.all_patterns().await.len(), 1);
    }

    #[tokio::test]
    async fn test_entries_wait_for_review_without_auto_publishing() {
        let h = harness(vec![], vec![strong_ticket()], 1);

        let result = h.service.run_learning_pipeline(None).await.unwrap();
        assert_eq!(result.new_faqs, 1);
        assert_eq!(result.pending_review, 1);

        let entries = h.store.all_entries().await;
        assert_eq!(entries[0].status, FaqEntryStatus::PendingReview);
        assert_eq!(entries[0].confidence, 81);
        assert_eq!(entries[0].source, FaqEntrySource::Ticket);
        assert_eq!(entries[0].category, "billing");
    }

    #[tokio::test]
    async fn test_auto_publish_requires_flag_and_threshold() {
        let h = harness(vec![], vec![strong_ticket()], 1);
        h.config
            .update_config("enableAutoPublishing", &json!(true))
            .await
            .unwrap();
        h.config
            .update_config("minConfidenceForAutoPublish", &json!(80))
            .await
            .unwrap();

        let result = h.service.run_learning_pipeline(None).await.unwrap();
        assert_eq!(result.published, 1);
        let entries = h.store.all_entries().await;
        assert_eq!(entries[0].status, FaqEntryStatus::Published);
        assert!(entries[0].published_at.is_some());
    }

    #[tokio::test]
    async fn test_high_confidence_stays_pending_when_flag_off() {
        let h = harness(vec![], vec![strong_ticket()], 1);
        h.config
            .update_config("minConfidenceForAutoPublish", &json!(50))
            .await
            .unwrap();

        h.service.run_learning_pipeline(None).await.unwrap();
        let entries = h.store.all_entries().await;
        assert_eq!(entries[0].status, FaqEntryStatus::PendingReview);
    }

    #[tokio::test]
    async fn test_sources_are_learned_once() {
        let h = harness(vec![], vec![strong_ticket()], 1);

        let first = h.service.run_learning_pipeline(None).await.unwrap();
        let second = h.service.run_learning_pipeline(None).await.unwrap();
        assert_eq!(first.new_faqs, 1);
        assert_eq!(second.new_faqs, 0);
        assert_eq!(second.skipped_duplicates, 1);
        assert_eq!(h.store.all_entries().await.len(), 1);

        // The repeat run examined the ticket but did not spend budget on it
        let daily = h.store.daily_processed(Utc::now().date_naive()).await.unwrap();
        assert_eq!(daily, 1);
    }

    #[tokio::test]
    async fn test_daily_limit_truncates_then_refuses() {
        let tickets: Vec<ExtractedData> = (0..3)
            .map(|i| ExtractedData {
                id: format!("ticket:{i}"),
                source_id: Uuid::new_v4(),
                ..strong_ticket()
            })
            .collect();
        let h = harness(vec![], tickets, 2);
        h.store
            .add_daily_processed(Utc::now().date_naive(), 998)
            .await
            .unwrap();

        let first = h.service.run_learning_pipeline(None).await.unwrap();
        assert_eq!(first.extracted_items, 3);
        assert_eq!(first.processed_items, 2);
        assert_eq!(first.new_faqs, 2);
        assert_eq!(h.store.all_entries().await.len(), 2);

        let err = h.service.run_learning_pipeline(None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::DailyLimitReached {
                processed: 1000,
                limit: 1000
            }
        ));
    }

    #[tokio::test]
    async fn test_long_run_keeps_lease_from_other_instances() {
        let store = Arc::new(InMemoryLearningStore::default());
        let (_, first) = service_on(
            store.clone(),
            extractor(DataSource::Chat, vec![]),
            extractor(DataSource::Ticket, vec![strong_ticket()]),
            Arc::new(SlowProvider(StdDuration::from_millis(1500))),
            1,
        );
        let (_, second) = service_on(
            store.clone(),
            extractor(DataSource::Chat, vec![]),
            extractor(DataSource::Ticket, vec![strong_ticket()]),
            ai_provider(0),
            1,
        );
        let first = Arc::new(first);

        let running = {
            let first = first.clone();
            tokio::spawn(async move { first.run_learning_pipeline(None).await })
        };

        // Past the one second TTL, the lease must still be held
        tokio::time::sleep(StdDuration::from_millis(1300)).await;
        assert!(first.is_processing());
        let err = second.run_learning_pipeline(None).await.unwrap_err();
        assert!(matches!(err, AppError::PipelineAlreadyRunning));

        let result = running.await.unwrap().unwrap();
        assert_eq!(result.new_faqs, 1);
        assert_eq!(store.all_entries().await.len(), 1);
        assert!(!first.is_processing());

        assert!(store
            .try_acquire_lease(PIPELINE_LEASE, Uuid::new_v4(), 60)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_lost_lease_aborts_run() {
        let store = Arc::new(InMemoryLearningStore::default());
        let (_, service) = service_on(
            store.clone(),
            extractor(DataSource::Chat, vec![]),
            extractor(DataSource::Ticket, vec![strong_ticket()]),
            Arc::new(SlowProvider(StdDuration::from_millis(2000))),
            1,
        );
        let service = Arc::new(service);

        let running = {
            let service = service.clone();
            tokio::spawn(async move { service.run_learning_pipeline(None).await })
        };

        // The lease lapses and another instance picks it up
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        store.expire_lease(PIPELINE_LEASE).await;
        assert!(store
            .try_acquire_lease(PIPELINE_LEASE, Uuid::new_v4(), 60)
            .await
            .unwrap());

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(store.all_entries().await.is_empty());
        assert!(!service.is_processing());
    }

    fn recording_extractor(
        source: DataSource,
        seen: Arc<Mutex<Vec<ExtractionCriteria>>>,
    ) -> Arc<dyn DataExtractor> {
        let mut mock = MockDataExtractor::new();
        mock.expect_source().return_const(source);
        mock.expect_extract().returning(move |criteria| {
            seen.lock().unwrap().push(criteria.clone());
            Ok(vec![])
        });
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_scheduled_window_follows_processing_interval() {
        let store = Arc::new(InMemoryLearningStore::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (config, service) = service_on(
            store,
            recording_extractor(DataSource::Chat, seen.clone()),
            recording_extractor(DataSource::Ticket, seen.clone()),
            ai_provider(0),
            60,
        );
        config
            .update_config("processingInterval", &json!(300))
            .await
            .unwrap();
        assert_eq!(service.scheduling_interval().await, StdDuration::from_secs(300));

        let result = service.scheduled_learning().await.unwrap();
        assert_eq!(result.status, PipelineStatus::Completed);

        let range = seen.lock().unwrap()[0].date_range.unwrap();
        assert_eq!((range.end - range.start).num_seconds(), 300);

        let status = config.system_status().await.unwrap().unwrap();
        assert_eq!(status.scheduled_through, Some(range.end));
    }

    #[tokio::test]
    async fn test_scheduled_window_reaches_back_to_last_scheduled_run() {
        let store = Arc::new(InMemoryLearningStore::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (config, service) = service_on(
            store,
            recording_extractor(DataSource::Chat, seen.clone()),
            recording_extractor(DataSource::Ticket, seen.clone()),
            ai_provider(0),
            60,
        );
        config
            .update_config("processingInterval", &json!(300))
            .await
            .unwrap();

        // The previous scheduled run finished two hours ago, so the gap since
        // then is covered rather than only the last interval
        let watermark = Utc::now() - Duration::hours(2);
        config
            .record_pipeline_run(&SystemStatus {
                last_run_at: watermark,
                last_run_status: "completed".to_string(),
                last_run_processed: 0,
                last_run_new_faqs: 0,
                last_run_duration_ms: 0,
                scheduled_through: Some(watermark),
            })
            .await
            .unwrap();

        service.scheduled_learning().await.unwrap();
        let range = seen.lock().unwrap()[0].date_range.unwrap();
        assert_eq!(range.start, watermark);

        // A manual run afterwards leaves the watermark where scheduling put it
        service.run_learning_pipeline(None).await.unwrap();
        let status = config.system_status().await.unwrap().unwrap();
        assert_eq!(status.scheduled_through, Some(range.end));
    }

    #[tokio::test]
    async fn test_refuses_when_lease_is_held_elsewhere() {
        let h = harness(vec![], vec![strong_ticket()], 0);
        assert!(h
            .store
            .try_acquire_lease(PIPELINE_LEASE, Uuid::new_v4(), 600)
            .await
            .unwrap());

        let err = h.service.run_learning_pipeline(None).await.unwrap_err();
        assert!(matches!(err, AppError::PipelineAlreadyRunning));
        assert!(!h.service.is_processing());
    }

    #[tokio::test]
    async fn test_refuses_past_daily_limit() {
        let h = harness(vec![], vec![strong_ticket()], 0);
        h.store
            .add_daily_processed(Utc::now().date_naive(), 1000)
            .await
            .unwrap();

        let err = h.service.run_learning_pipeline(None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::DailyLimitReached {
                processed: 1000,
                limit: 1000
            }
        ));

        // Lease was released, so a later run is not blocked by it
        assert!(h
            .store
            .try_acquire_lease(PIPELINE_LEASE, Uuid::new_v4(), 60)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_daily_counter_accumulates() {
        let h = harness(vec![weak_chat()], vec![], 0);
        h.service.run_learning_pipeline(None).await.unwrap();
        let status = h.service.pipeline_status().await.unwrap();
        assert_eq!(status.daily_processing_count, 1);
        assert_eq!(status.last_run.unwrap().last_run_status, "completed");
        assert!(!status.is_processing);
    }

    #[tokio::test]
    async fn test_realtime_disabled_is_noop() {
        let h = harness(vec![], vec![], 0);
        let result = h
            .service
            .process_realtime_data(DataSource::Chat, Uuid::new_v4())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_feedback_adjusts_confidence() {
        let h = harness(vec![], vec![strong_ticket()], 1);
        h.service.run_learning_pipeline(None).await.unwrap();
        let id = h.store.all_entries().await[0].id;

        let mut entry = h.store.get_entry(id).await.unwrap().unwrap();
        for _ in 0..10 {
            entry = h
                .service
                .record_feedback(id, FeedbackKind::NotHelpful)
                .await
                .unwrap();
        }
        assert_eq!(entry.not_helpful_count, 10);
        assert_eq!(entry.confidence, 79);

        let missing = h
            .service
            .record_feedback(Uuid::new_v4(), FeedbackKind::Helpful)
            .await
            .unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dashboard_reflects_entries() {
        let h = harness(vec![], vec![strong_ticket()], 1);
        h.service.run_learning_pipeline(None).await.unwrap();

        let dashboard = h.service.dashboard().await.unwrap();
        assert_eq!(dashboard.stats.pending_review, 1);
        assert_eq!(dashboard.stats.total_faqs, 0);
        assert_eq!(dashboard.stats.processing_status, "stopped");
        assert_eq!(dashboard.learning_progress.from_tickets, 1);
        assert_eq!(dashboard.quality_metrics.medium_confidence, 1);
        assert_eq!(dashboard.recent_activity.len(), 1);
        assert_eq!(dashboard.recent_activity[0].status, "warning");
        assert_eq!(dashboard.providers.len(), 1);
    }
}
