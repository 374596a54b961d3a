use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use super::extracted::DataSource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternSource {
    pub source: DataSource,
    pub source_id: Uuid,
    pub item_id: String,
}

/// Recurring question shape, persisted and accumulated across runs
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LearningPattern {
    pub id: Uuid,
    pub pattern_hash: String,
    pub pattern_type: String,
    /// Representative question for the cluster
    pub template: String,
    pub frequency: i32,
    pub sources: Json<Vec<PatternSource>>,
    pub keywords: Vec<String>,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cluster found in a single run, before it is merged into storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMatch {
    pub pattern_hash: String,
    pub template: String,
    pub frequency: usize,
    /// Mean pairwise similarity of the grouped questions
    pub similarity: f64,
    pub keywords: Vec<String>,
    pub category: String,
    pub sources: Vec<PatternSource>,
}

impl PatternMatch {
    pub fn covers(&self, item_id: &str) -> bool {
        self.sources.iter().any(|s| s.item_id == item_id)
    }
}

/// Question/answer pair found inside a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionAnswerPair {
    pub question: String,
    pub answer: String,
    pub confidence: i32,
    pub context: Option<String>,
}
