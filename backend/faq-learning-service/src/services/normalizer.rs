use crate::models::{ExtractedData, LearningSettings, NormalizedItem};
use crate::services::pattern_recognition::infer_category;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex")
});
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\s().-]{7,}\d").expect("valid regex"));

/// Why an extracted record did not make it into the batch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("question shorter than {0} characters")]
    QuestionTooShort(usize),

    #[error("question longer than {0} characters")]
    QuestionTooLong(usize),

    #[error("missing answer")]
    MissingAnswer,

    #[error("answer shorter than {0} characters")]
    AnswerTooShort(usize),

    #[error("category {0} is excluded")]
    ExcludedCategory(String),
}

/// Strip markup and entities, mask contact details, collapse whitespace
pub fn clean_text(text: &str) -> String {
    let without_tags = HTML_TAG.replace_all(text, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let masked = EMAIL.replace_all(&decoded, "[email]");
    let masked = PHONE.replace_all(&masked, "[phone]");
    WHITESPACE.replace_all(&masked, " ").trim().to_string()
}

pub fn normalize_item(
    item: ExtractedData,
    settings: &LearningSettings,
) -> Result<NormalizedItem, SkipReason> {
    let question = clean_text(&item.question);
    let question_len = question.chars().count();
    if question_len < settings.min_question_length {
        return Err(SkipReason::QuestionTooShort(settings.min_question_length));
    }
    if question_len > settings.max_question_length {
        return Err(SkipReason::QuestionTooLong(settings.max_question_length));
    }

    let answer = item
        .answer
        .as_deref()
        .map(clean_text)
        .filter(|a| !a.is_empty())
        .ok_or(SkipReason::MissingAnswer)?;
    if answer.chars().count() < settings.min_answer_length {
        return Err(SkipReason::AnswerTooShort(settings.min_answer_length));
    }

    let category = match item.metadata.category.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => c.to_lowercase(),
        _ if settings.auto_categorization_enabled => {
            infer_category([question.as_str(), answer.as_str()])
        }
        _ => "general".to_string(),
    };
    if settings
        .excluded_categories
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(&category))
    {
        return Err(SkipReason::ExcludedCategory(category));
    }

    Ok(NormalizedItem {
        id: item.id,
        question,
        answer: Some(answer),
        extraction_confidence: item.confidence.clamp(0, 100),
        source_id: item.source_id,
        source: item.source,
        context: item.context.as_deref().map(clean_text).filter(|c| !c.is_empty()),
        category,
        metadata: item.metadata,
    })
}

/// Normalize a batch, logging and dropping records that fail the quality gates
pub fn normalize(items: Vec<ExtractedData>, settings: &LearningSettings) -> Vec<NormalizedItem> {
    let total = items.len();
    let normalized: Vec<NormalizedItem> = items
        .into_iter()
        .filter_map(|item| {
            let id = item.id.clone();
            match normalize_item(item, settings) {
                Ok(n) => Some(n),
                Err(reason) => {
                    tracing::debug!(item_id = %id, reason = %reason, "Skipping extracted item");
                    None
                }
            }
        })
        .collect();

    tracing::info!(
        extracted = total,
        normalized = normalized.len(),
        "Normalized extracted data"
    );
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataSource, SourceMetadata};
    use chrono::Utc;
    use uuid::Uuid;

    fn extracted(question: &str, answer: Option<&str>, category: Option<&str>) -> ExtractedData {
        let mut metadata = SourceMetadata::at(Utc::now());
        metadata.category = category.map(str::to_string);
        ExtractedData {
            id: "ticket:1".to_string(),
            question: question.to_string(),
            answer: answer.map(str::to_string),
            confidence: 70,
            source_id: Uuid::new_v4(),
            source: DataSource::Ticket,
            context: None,
            metadata,
        }
    }

    #[test]
    fn test_clean_text_strips_markup_and_masks_contacts() {
        let cleaned = clean_text(
            "<p>Email me at jane.doe@example.com&nbsp;or call +1 (555) 123-4567</p>\n\n",
        );
        assert_eq!(cleaned, "Email me at [email] or call [phone]");
    }

    #[test]
    fn test_quality_gates() {
        let settings = LearningSettings::default();

        assert_eq!(
            normalize_item(extracted("Help?", Some("a long enough answer here"), None), &settings)
                .unwrap_err(),
            SkipReason::QuestionTooShort(10)
        );
        assert_eq!(
            normalize_item(extracted("How do I close my account?", None, None), &settings)
                .unwrap_err(),
            SkipReason::MissingAnswer
        );
        assert_eq!(
            normalize_item(extracted("How do I close my account?", Some("Ask us."), None), &settings)
                .unwrap_err(),
            SkipReason::AnswerTooShort(20)
        );
    }

    #[test]
    fn test_category_inferred_when_missing() {
        let settings = LearningSettings::default();
        let item = normalize_item(
            extracted(
                "Why was my payment declined?",
                Some("Your bank rejected the charge, try another card."),
                None,
            ),
            &settings,
        )
        .unwrap();
        assert_eq!(item.category, "billing");
    }

    #[test]
    fn test_excluded_category_is_dropped() {
        let settings = LearningSettings {
            excluded_categories: vec!["billing".to_string()],
            ..LearningSettings::default()
        };
        let result = normalize_item(
            extracted(
                "Why was my payment declined?",
                Some("Your bank rejected the charge, try another card."),
                Some("Billing"),
            ),
            &settings,
        );
        assert_eq!(
            result.unwrap_err(),
            SkipReason::ExcludedCategory("billing".to_string())
        );
    }

    #[test]
    fn test_normalize_batch_keeps_valid_items() {
        let settings = LearningSettings::default();
        let items = vec![
            extracted(
                "How do I export my data?",
                Some("Open Settings, then Privacy and choose Export."),
                Some("account"),
            ),
            extracted("hi", Some("hello there, how can we help?"), None),
        ];
        let normalized = normalize(items, &settings);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].category, "account");
    }
}
