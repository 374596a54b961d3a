use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a candidate question/answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Chat,
    Ticket,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Chat => "chat",
            DataSource::Ticket => "ticket",
        }
    }
}

/// Signals about the originating conversation, used for filtering and scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    /// Chat session length in seconds
    pub session_duration: Option<i64>,
    /// Ticket open-to-resolved time in seconds
    pub resolution_time: Option<i64>,
    /// Customer rating on a 1..5 scale
    pub satisfaction_score: Option<f64>,
    pub is_resolved: bool,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub message_count: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl SourceMetadata {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            session_duration: None,
            resolution_time: None,
            satisfaction_score: None,
            is_resolved: false,
            category: None,
            tags: Vec::new(),
            message_count: None,
            timestamp,
        }
    }
}

/// Raw candidate pulled by an extractor; never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    /// Unique within a run, e.g. `chat:<session>:<pair index>`
    pub id: String,
    pub question: String,
    pub answer: Option<String>,
    /// Extractor's own confidence in the pairing, 0..100
    pub confidence: i32,
    pub source_id: Uuid,
    pub source: DataSource,
    pub context: Option<String>,
    pub metadata: SourceMetadata,
}

/// Extracted record after cleaning and categorisation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedItem {
    pub id: String,
    pub question: String,
    pub answer: Option<String>,
    pub extraction_confidence: i32,
    pub source_id: Uuid,
    pub source: DataSource,
    pub context: Option<String>,
    pub category: String,
    pub metadata: SourceMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Filters applied by the extractors; unset fields fall back to the tunables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionCriteria {
    pub date_range: Option<DateRange>,
    pub min_session_duration: Option<i64>,
    pub min_satisfaction_score: Option<f64>,
    pub min_resolution_time: Option<i64>,
    pub categories: Option<Vec<String>>,
    pub excluded_categories: Option<Vec<String>>,
    pub max_results: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Agent,
    Bot,
    System,
}

impl SenderType {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "agent" | "support" | "staff" => SenderType::Agent,
            "bot" | "assistant" => SenderType::Bot,
            "system" => SenderType::System,
            _ => SenderType::User,
        }
    }

    pub fn is_responder(&self) -> bool {
        matches!(self, SenderType::Agent | SenderType::Bot)
    }
}

/// One message of a chat transcript or ticket thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub content: String,
    pub sender: SenderType,
    pub timestamp: DateTime<Utc>,
}
