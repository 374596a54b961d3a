use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::extracted::DataSource;
use crate::error::AppError;

/// Learned FAQ status with review state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "faq_entry_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FaqEntryStatus {
    PendingReview,
    Published,
    Rejected,
}

impl FaqEntryStatus {
    /// pending_review -> published/rejected only
    pub fn can_transition_to(&self, new_status: FaqEntryStatus) -> bool {
        matches!(
            (self, new_status),
            (FaqEntryStatus::PendingReview, FaqEntryStatus::Published)
                | (FaqEntryStatus::PendingReview, FaqEntryStatus::Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FaqEntryStatus::PendingReview)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FaqEntryStatus::PendingReview => "pending_review",
            FaqEntryStatus::Published => "published",
            FaqEntryStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "faq_entry_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FaqEntrySource {
    Chat,
    Ticket,
    UserSuggestion,
}

impl FaqEntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaqEntrySource::Chat => "chat",
            FaqEntrySource::Ticket => "ticket",
            FaqEntrySource::UserSuggestion => "user_suggestion",
        }
    }
}

impl From<DataSource> for FaqEntrySource {
    fn from(source: DataSource) -> Self {
        match source {
            DataSource::Chat => FaqEntrySource::Chat,
            DataSource::Ticket => FaqEntrySource::Ticket,
        }
    }
}

/// Generated FAQ entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LearnedFaqEntry {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    pub confidence: i32,
    pub status: FaqEntryStatus,
    pub source: FaqEntrySource,
    pub source_id: Uuid,
    /// Hash of the normalized question, used to skip already-learned sources
    pub content_hash: String,
    pub category: String,
    pub keywords: Vec<String>,
    pub metadata: serde_json::Value,
    pub helpful_count: i32,
    pub not_helpful_count: i32,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reviewer-supplied changes applied before publishing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqEdits {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub category: Option<String>,
    pub keywords: Option<Vec<String>>,
}

impl FaqEdits {
    pub fn is_empty(&self) -> bool {
        self.question.is_none()
            && self.answer.is_none()
            && self.category.is_none()
            && self.keywords.is_none()
    }
}

impl LearnedFaqEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        question: String,
        answer: String,
        confidence: i32,
        status: FaqEntryStatus,
        source: FaqEntrySource,
        source_id: Uuid,
        content_hash: String,
        category: String,
        keywords: Vec<String>,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            question,
            answer,
            confidence,
            status,
            source,
            source_id,
            content_hash,
            category,
            keywords,
            metadata,
            helpful_count: 0,
            not_helpful_count: 0,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            published_at: (status == FaqEntryStatus::Published).then_some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Review transition; edits are applied only when publishing
    pub fn review(
        &mut self,
        reviewer_id: Uuid,
        decision: FaqEntryStatus,
        notes: Option<String>,
        edits: Option<FaqEdits>,
    ) -> Result<(), AppError> {
        if !self.status.can_transition_to(decision) {
            return Err(AppError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: decision.as_str().to_string(),
            });
        }

        if decision == FaqEntryStatus::Published {
            if let Some(edits) = edits {
                if let Some(question) = edits.question {
                    self.question = question;
                }
                if let Some(answer) = edits.answer {
                    self.answer = answer;
                }
                if let Some(category) = edits.category {
                    self.category = category;
                }
                if let Some(keywords) = edits.keywords {
                    self.keywords = keywords;
                }
            }
        }

        let now = Utc::now();
        self.status = decision;
        self.reviewed_by = Some(reviewer_id);
        self.reviewed_at = Some(now);
        self.review_notes = notes;
        if decision == FaqEntryStatus::Published {
            self.published_at = Some(now);
        }
        self.updated_at = now;

        Ok(())
    }
}
