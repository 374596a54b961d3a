use crate::error::AppResult;
use crate::extractors::DataExtractor;
use crate::models::{DataSource, DateRange, ExtractedData, ExtractionCriteria, LearningSettings};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub items: Vec<ExtractedData>,
    pub chat_extracted: usize,
    pub ticket_extracted: usize,
    pub errors: Vec<String>,
    pub failed_sources: usize,
}

impl ExtractionOutcome {
    pub fn all_sources_failed(&self) -> bool {
        self.failed_sources == 2
    }
}

/// Fans extraction out to the chat and ticket stores
pub struct BatchProcessor {
    chat: Arc<dyn DataExtractor>,
    ticket: Arc<dyn DataExtractor>,
}

/// Tunable defaults with caller overrides applied field by field
pub fn build_criteria(
    settings: &LearningSettings,
    overrides: Option<ExtractionCriteria>,
) -> ExtractionCriteria {
    let overrides = overrides.unwrap_or_default();
    let end = Utc::now();

    let mut excluded = settings.excluded_categories.clone();
    for category in overrides.excluded_categories.unwrap_or_default() {
        if !excluded.iter().any(|c| c.eq_ignore_ascii_case(&category)) {
            excluded.push(category);
        }
    }

    ExtractionCriteria {
        date_range: overrides.date_range.or(Some(DateRange {
            start: end - Duration::days(settings.retention_period_days),
            end,
        })),
        min_session_duration: overrides
            .min_session_duration
            .or(Some(settings.chat_session_min_duration)),
        min_satisfaction_score: overrides
            .min_satisfaction_score
            .or(Some(settings.required_satisfaction_score)),
        min_resolution_time: overrides
            .min_resolution_time
            .or(Some(settings.ticket_min_resolution_time)),
        categories: overrides.categories.filter(|c| !c.is_empty()),
        excluded_categories: Some(excluded),
        max_results: overrides.max_results.or(Some(settings.batch_size)),
    }
}

fn settle(
    source: DataSource,
    result: AppResult<Vec<ExtractedData>>,
    errors: &mut Vec<String>,
) -> Option<Vec<ExtractedData>> {
    match result {
        Ok(items) => {
            info!(source = source.as_str(), extracted = items.len(), "Extraction finished");
            Some(items)
        }
        Err(e) => {
            let message = format!("{} extraction failed: {}", source.as_str(), e);
            error!("{}", message);
            errors.push(message);
            None
        }
    }
}

impl BatchProcessor {
    pub fn new(chat: Arc<dyn DataExtractor>, ticket: Arc<dyn DataExtractor>) -> Self {
        Self { chat, ticket }
    }

    pub fn extractor_for(&self, source: DataSource) -> &Arc<dyn DataExtractor> {
        match source {
            DataSource::Chat => &self.chat,
            DataSource::Ticket => &self.ticket,
        }
    }

    /// Both sources run concurrently; a failing source contributes an empty
    /// list and an error message instead of failing the batch
    pub async fn extract_all(&self, criteria: &ExtractionCriteria) -> ExtractionOutcome {
        let (chat, ticket) = tokio::join!(self.chat.extract(criteria), self.ticket.extract(criteria));

        let mut outcome = ExtractionOutcome::default();
        for (source, result) in [(DataSource::Chat, chat), (DataSource::Ticket, ticket)] {
            match settle(source, result, &mut outcome.errors) {
                Some(items) => {
                    match source {
                        DataSource::Chat => outcome.chat_extracted = items.len(),
                        DataSource::Ticket => outcome.ticket_extracted = items.len(),
                    }
                    outcome.items.extend(items);
                }
                None => outcome.failed_sources += 1,
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::extractors::MockDataExtractor;
    use crate::models::SourceMetadata;
    use uuid::Uuid;

    fn extracted(source: DataSource, id: &str) -> ExtractedData {
        ExtractedData {
            id: id.to_string(),
            question: "How do I change my plan?".to_string(),
            answer: Some("Go to Billing and choose a new plan.".to_string()),
            confidence: 80,
            source_id: Uuid::new_v4(),
            source,
            context: None,
            metadata: SourceMetadata::at(Utc::now()),
        }
    }

    fn extractor(
        source: DataSource,
        result: fn() -> AppResult<Vec<ExtractedData>>,
    ) -> Arc<dyn DataExtractor> {
        let mut mock = MockDataExtractor::new();
        mock.expect_source().return_const(source);
        mock.expect_extract().times(1).returning(move |_| result());
        Arc::new(mock)
    }

    #[test]
    fn test_criteria_defaults_come_from_settings() {
        let settings = LearningSettings {
            excluded_categories: vec!["spam".to_string()],
            ..LearningSettings::default()
        };
        let criteria = build_criteria(&settings, None);
        assert_eq!(criteria.min_session_duration, Some(300));
        assert_eq!(criteria.min_resolution_time, Some(1800));
        assert_eq!(criteria.min_satisfaction_score, Some(4.0));
        assert_eq!(criteria.max_results, Some(100));
        assert_eq!(criteria.excluded_categories, Some(vec!["spam".to_string()]));
        let range = criteria.date_range.unwrap();
        assert_eq!((range.end - range.start).num_days(), 365);
    }

    #[test]
    fn test_overrides_win() {
        let overrides = ExtractionCriteria {
            min_session_duration: Some(60),
            excluded_categories: Some(vec!["test".to_string()]),
            max_results: Some(10),
            ..ExtractionCriteria::default()
        };
        let settings = LearningSettings {
            excluded_categories: vec!["spam".to_string()],
            ..LearningSettings::default()
        };
        let criteria = build_criteria(&settings, Some(overrides));
        assert_eq!(criteria.min_session_duration, Some(60));
        assert_eq!(criteria.max_results, Some(10));
        assert_eq!(
            criteria.excluded_categories,
            Some(vec!["spam".to_string(), "test".to_string()])
        );
    }

    #[tokio::test]
    async fn test_failed_branch_is_isolated() {
        let processor = BatchProcessor::new(
            extractor(DataSource::Chat, || {
                Err(AppError::Database("connection reset".to_string()))
            }),
            extractor(DataSource::Ticket, || {
                Ok(vec![
                    extracted(DataSource::Ticket, "ticket:1"),
                    extracted(DataSource::Ticket, "ticket:2"),
                ])
            }),
        );

        let outcome = processor.extract_all(&ExtractionCriteria::default()).await;
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.chat_extracted, 0);
        assert_eq!(outcome.ticket_extracted, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("chat extraction failed"));
        assert!(!outcome.all_sources_failed());
    }

    #[tokio::test]
    async fn test_both_branches_failing() {
        let processor = BatchProcessor::new(
            extractor(DataSource::Chat, || Err(AppError::Database("down".to_string()))),
            extractor(DataSource::Ticket, || Err(AppError::Database("down".to_string()))),
        );
        let outcome = processor.extract_all(&ExtractionCriteria::default()).await;
        assert!(outcome.items.is_empty());
        assert!(outcome.all_sources_failed());
    }
}
