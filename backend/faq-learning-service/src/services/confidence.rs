use crate::models::{DataSource, LearningSettings, NormalizedItem};
use serde::{Deserialize, Serialize};

/// Items scoring below this never reach an AI provider
pub const MIN_CONFIDENCE_FOR_AI: i32 = 50;

const DEFAULT_AI_CONFIDENCE: f64 = 70.0;
const FEEDBACK_ADJUSTMENT_FACTOR: f64 = 0.1;

const QUESTION_WORDS: &[&str] = &[
    "how", "what", "why", "when", "where", "can", "could", "should", "would",
];
const ACTION_WORDS: &[&str] = &[
    "click", "go to", "navigate", "select", "choose", "enter", "type",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    AutoPublish,
    Review,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Helpful,
    NotHelpful,
    Improved,
}

#[derive(Debug, Clone, Copy)]
struct ConfidenceWeights {
    source_quality: f64,
    pattern_frequency: f64,
    resolution_success: f64,
    user_satisfaction: f64,
    context_clarity: f64,
    answer_completeness: f64,
    similarity_to_existing: f64,
    ai_confidence: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            source_quality: 0.15,
            pattern_frequency: 0.20,
            resolution_success: 0.15,
            user_satisfaction: 0.15,
            context_clarity: 0.10,
            answer_completeness: 0.15,
            similarity_to_existing: 0.05,
            ai_confidence: 0.05,
        }
    }
}

/// Per-factor scores, each 0..100
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceFactors {
    pub source_quality: f64,
    pub pattern_frequency: f64,
    pub resolution_success: f64,
    pub user_satisfaction: f64,
    pub context_clarity: f64,
    pub answer_completeness: f64,
    pub similarity_to_existing: f64,
    pub ai_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceResult {
    pub overall_confidence: i32,
    pub factors: ConfidenceFactors,
    pub reasoning: Vec<String>,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceCalculator {
    weights: ConfidenceWeights,
}

impl ConfidenceCalculator {
    pub fn calculate_confidence(
        &self,
        item: &NormalizedItem,
        pattern_frequency: usize,
        similarity_to_existing: f64,
        ai_confidence: Option<i32>,
        settings: &LearningSettings,
    ) -> ConfidenceResult {
        let factors = ConfidenceFactors {
            source_quality: source_quality(item),
            pattern_frequency: pattern_frequency_score(pattern_frequency.max(1)),
            resolution_success: resolution_success(item),
            user_satisfaction: user_satisfaction(item),
            context_clarity: context_clarity(item),
            answer_completeness: answer_completeness(item.answer.as_deref().unwrap_or_default()),
            similarity_to_existing: similarity_score(similarity_to_existing),
            ai_confidence: ai_confidence
                .filter(|c| *c > 0)
                .map(|c| c.clamp(0, 100) as f64)
                .unwrap_or(DEFAULT_AI_CONFIDENCE),
        };

        let overall_confidence = self.weighted_score(&factors);
        ConfidenceResult {
            overall_confidence,
            reasoning: reasoning(&factors),
            recommendation: recommendation(overall_confidence, settings),
            factors,
        }
    }

    fn weighted_score(&self, f: &ConfidenceFactors) -> i32 {
        let w = &self.weights;
        let sum = f.source_quality * w.source_quality
            + f.pattern_frequency * w.pattern_frequency
            + f.resolution_success * w.resolution_success
            + f.user_satisfaction * w.user_satisfaction
            + f.context_clarity * w.context_clarity
            + f.answer_completeness * w.answer_completeness
            + f.similarity_to_existing * w.similarity_to_existing
            + f.ai_confidence * w.ai_confidence;
        (sum.round() as i32).clamp(0, 100)
    }
}

pub fn recommendation(confidence: i32, settings: &LearningSettings) -> Recommendation {
    if confidence >= settings.min_confidence_for_auto_publish {
        Recommendation::AutoPublish
    } else if confidence >= settings.min_confidence_for_review {
        Recommendation::Review
    } else {
        Recommendation::Discard
    }
}

/// New stored confidence after `count` pieces of feedback of one kind
pub fn adjust_for_feedback(current: i32, kind: FeedbackKind, count: u32) -> i32 {
    let n = count as f64;
    let adjustment = match kind {
        FeedbackKind::Helpful => (n * FEEDBACK_ADJUSTMENT_FACTOR).min(5.0),
        FeedbackKind::NotHelpful => -(n * FEEDBACK_ADJUSTMENT_FACTOR * 2.0).min(10.0),
        FeedbackKind::Improved => (n * FEEDBACK_ADJUSTMENT_FACTOR * 0.5).min(3.0),
    };
    ((current as f64 + adjustment).round() as i32).clamp(0, 100)
}

fn source_quality(item: &NormalizedItem) -> f64 {
    let meta = &item.metadata;
    let mut score = 50.0;
    match item.source {
        DataSource::Ticket => {
            score += 20.0;
            if meta.resolution_time.is_some_and(|t| t > 1800) {
                score += 10.0;
            }
        }
        DataSource::Chat => {
            score += 10.0;
            if meta.session_duration.is_some_and(|d| d > 300) {
                score += 10.0;
            }
        }
    }
    if meta.category.is_some() || !meta.tags.is_empty() {
        score += 10.0;
    }
    f64::min(score, 100.0)
}

fn pattern_frequency_score(frequency: usize) -> f64 {
    match frequency {
        f if f >= 10 => 95.0,
        f if f >= 5 => 85.0,
        f if f >= 3 => 70.0,
        2 => 55.0,
        _ => 40.0,
    }
}

fn resolution_success(item: &NormalizedItem) -> f64 {
    let meta = &item.metadata;
    match item.source {
        DataSource::Ticket if meta.is_resolved => 85.0,
        DataSource::Chat if meta.satisfaction_score.is_some_and(|s| s >= 4.0) => 80.0,
        DataSource::Chat if meta.session_duration.is_some_and(|d| d > 180) => 70.0,
        _ => 60.0,
    }
}

fn user_satisfaction(item: &NormalizedItem) -> f64 {
    match item.metadata.satisfaction_score {
        Some(score) if score > 0.0 => ((score - 1.0) * 25.0).clamp(0.0, 100.0),
        _ => 60.0,
    }
}

fn context_clarity(item: &NormalizedItem) -> f64 {
    let mut score = 50.0;
    if item
        .context
        .as_deref()
        .is_some_and(|c| c.chars().count() > 50)
    {
        score += 20.0;
    }
    let question = &item.question;
    if (20..=200).contains(&question.chars().count()) {
        score += 15.0;
    }
    if question.contains('?') {
        score += 10.0;
    }
    let lower = question.to_lowercase();
    if QUESTION_WORDS.iter().any(|w| lower.contains(w)) {
        score += 15.0;
    }
    f64::min(score, 100.0)
}

fn answer_completeness(answer: &str) -> f64 {
    let len = answer.chars().count();
    let mut score: f64 = 50.0;
    if (50..=1000).contains(&len) {
        score += 20.0;
    } else if len < 20 {
        score -= 20.0;
    } else if len > 2000 {
        score -= 10.0;
    }
    let lower = answer.to_lowercase();
    if ACTION_WORDS.iter().any(|w| lower.contains(w)) {
        score += 15.0;
    }
    if answer.contains('\n') || answer.contains("1.") || answer.contains('-') {
        score += 10.0;
    }
    score.min(100.0)
}

fn similarity_score(similarity: f64) -> f64 {
    // Near-identical content is most likely a duplicate
    if similarity > 0.9 {
        30.0
    } else if similarity > 0.7 {
        80.0
    } else if similarity > 0.5 {
        70.0
    } else {
        60.0
    }
}

fn reasoning(f: &ConfidenceFactors) -> Vec<String> {
    let mut reasons = Vec::new();
    let mut note = |value: f64, high: f64, low: f64, high_msg: &str, low_msg: &str| {
        if value >= high {
            reasons.push(high_msg.to_string());
        } else if value < low {
            reasons.push(low_msg.to_string());
        }
    };

    note(
        f.source_quality,
        80.0,
        50.0,
        "High source quality from structured data",
        "Low source quality, needs verification",
    );
    note(
        f.pattern_frequency,
        80.0,
        50.0,
        "Frequently recurring question",
        "Rare pattern with little supporting data",
    );
    note(
        f.user_satisfaction,
        80.0,
        40.0,
        "Customers were satisfied with this answer",
        "Low customer satisfaction",
    );
    note(
        f.context_clarity,
        80.0,
        50.0,
        "Clear context and well-formed question",
        "Unclear context or poorly formed question",
    );
    note(
        f.answer_completeness,
        80.0,
        50.0,
        "Complete and actionable answer",
        "Incomplete or unclear answer",
    );
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceMetadata;
    use chrono::Utc;
    use uuid::Uuid;

    fn strong_ticket() -> NormalizedItem {
        let mut metadata = SourceMetadata::at(Utc::now());
        metadata.resolution_time = Some(3600);
        metadata.is_resolved = true;
        metadata.satisfaction_score = Some(5.0);
        metadata.category = Some("billing".to_string());
        NormalizedItem {
            id: "ticket:1".to_string(),
            question: "How do I update the billing address on my invoice?".to_string(),
            answer: Some(
                "Go to Settings, select Billing and enter the new address.\nChanges apply to the next invoice."
                    .to_string(),
            ),
            extraction_confidence: 80,
            source_id: Uuid::new_v4(),
            source: DataSource::Ticket,
            context: Some(
                "Customer moved offices last month and the old address still shows on invoices."
                    .to_string(),
            ),
            category: "billing".to_string(),
            metadata,
        }
    }

    fn weak_chat() -> NormalizedItem {
        let mut metadata = SourceMetadata::at(Utc::now());
        metadata.satisfaction_score = Some(1.0);
        NormalizedItem {
            id: "chat:1:0".to_string(),
            question: "Printer jammed".to_string(),
            answer: Some("Power cycle it twice okay".to_string()),
            extraction_confidence: 60,
            source_id: Uuid::new_v4(),
            source: DataSource::Chat,
            context: None,
            category: "general".to_string(),
            metadata,
        }
    }

    #[test]
    fn test_strong_ticket_is_auto_publish_candidate() {
        let calc = ConfidenceCalculator::default();
        let result =
            calc.calculate_confidence(&strong_ticket(), 10, 0.0, None, &LearningSettings::default());

        assert_eq!(result.factors.source_quality, 90.0);
        assert_eq!(result.factors.pattern_frequency, 95.0);
        assert_eq!(result.factors.context_clarity, 100.0);
        assert_eq!(result.factors.answer_completeness, 95.0);
        assert_eq!(result.overall_confidence, 91);
        assert_eq!(result.recommendation, Recommendation::AutoPublish);
        assert!(result
            .reasoning
            .contains(&"Complete and actionable answer".to_string()));
    }

    #[test]
    fn test_weak_chat_scores_below_ai_gate() {
        let calc = ConfidenceCalculator::default();
        let result =
            calc.calculate_confidence(&weak_chat(), 1, 0.0, None, &LearningSettings::default());

        assert_eq!(result.factors.user_satisfaction, 0.0);
        assert_eq!(result.overall_confidence, 45);
        assert!(result.overall_confidence < MIN_CONFIDENCE_FOR_AI);
        assert_eq!(result.recommendation, Recommendation::Discard);
    }

    #[test]
    fn test_ai_confidence_moves_score() {
        let calc = ConfidenceCalculator::default();
        let settings = LearningSettings::default();
        let baseline = calc.calculate_confidence(&strong_ticket(), 10, 0.0, None, &settings);
        let with_ai = calc.calculate_confidence(&strong_ticket(), 10, 0.0, Some(100), &settings);
        assert!(with_ai.overall_confidence > baseline.overall_confidence);
    }

    #[test]
    fn test_recommendation_follows_thresholds() {
        let settings = LearningSettings {
            min_confidence_for_review: 40,
            min_confidence_for_auto_publish: 70,
            ..LearningSettings::default()
        };
        assert_eq!(recommendation(70, &settings), Recommendation::AutoPublish);
        assert_eq!(recommendation(69, &settings), Recommendation::Review);
        assert_eq!(recommendation(39, &settings), Recommendation::Discard);
    }

    #[test]
    fn test_similarity_penalises_duplicates() {
        assert_eq!(similarity_score(0.95), 30.0);
        assert_eq!(similarity_score(0.8), 80.0);
        assert_eq!(similarity_score(0.6), 70.0);
        assert_eq!(similarity_score(0.1), 60.0);
    }

    #[test]
    fn test_feedback_adjustment_is_capped_and_clamped() {
        assert_eq!(adjust_for_feedback(80, FeedbackKind::Helpful, 10), 81);
        assert_eq!(adjust_for_feedback(80, FeedbackKind::Helpful, 500), 85);
        assert_eq!(adjust_for_feedback(80, FeedbackKind::NotHelpful, 500), 70);
        assert_eq!(adjust_for_feedback(99, FeedbackKind::Improved, 500), 100);
        assert_eq!(adjust_for_feedback(3, FeedbackKind::NotHelpful, 100), 0);
    }
}
