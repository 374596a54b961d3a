use super::{effective_limit, effective_range, DataExtractor};
use crate::error::AppResult;
use crate::models::{
    ConversationMessage, DataSource, ExtractedData, ExtractionCriteria, SenderType, SourceMetadata,
};
use crate::services::pattern_recognition::identify_question_answer_pairs;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, category, tags, satisfaction_rating, started_at, ended_at";

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ChatSessionRow {
    pub id: Uuid,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub satisfaction_rating: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct ChatMessageRow {
    session_id: Uuid,
    sender_type: String,
    content: String,
    created_at: DateTime<Utc>,
}

/// Closed chat sessions paired into question/answer candidates
pub struct PgChatExtractor {
    pool: PgPool,
}

impl PgChatExtractor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_messages(
        &self,
        session_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, Vec<ConversationMessage>>> {
        let rows = sqlx::query_as::<_, ChatMessageRow>(
            r#"
            SELECT session_id, sender_type, content, created_at
            FROM chat_messages
            WHERE session_id = ANY($1)
            ORDER BY session_id, created_at
            "#,
        )
        .bind(session_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_session: HashMap<Uuid, Vec<ConversationMessage>> = HashMap::new();
        for row in rows {
            by_session
                .entry(row.session_id)
                .or_default()
                .push(ConversationMessage {
                    content: row.content,
                    sender: SenderType::parse(&row.sender_type),
                    timestamp: row.created_at,
                });
        }
        Ok(by_session)
    }

    async fn items_for(&self, sessions: Vec<ChatSessionRow>) -> AppResult<Vec<ExtractedData>> {
        let ids: Vec<Uuid> = sessions.iter().map(|s| s.id).collect();
        let mut messages = self.load_messages(&ids).await?;
        Ok(sessions
            .iter()
            .flat_map(|session| {
                let transcript = messages.remove(&session.id).unwrap_or_default();
                session_items(session, &transcript)
            })
            .collect())
    }
}

/// Candidates found in one transcript
pub(crate) fn session_items(
    session: &ChatSessionRow,
    transcript: &[ConversationMessage],
) -> Vec<ExtractedData> {
    let ended_at = session.ended_at.unwrap_or_else(Utc::now);
    let metadata = SourceMetadata {
        session_duration: Some((ended_at - session.started_at).num_seconds().max(0)),
        resolution_time: None,
        satisfaction_score: session.satisfaction_rating,
        is_resolved: true,
        category: session.category.clone(),
        tags: session.tags.clone(),
        message_count: Some(transcript.len() as i64),
        timestamp: ended_at,
    };

    identify_question_answer_pairs(transcript)
        .into_iter()
        .enumerate()
        .map(|(index, pair)| ExtractedData {
            id: format!("chat:{}:{}", session.id, index),
            question: pair.question,
            answer: Some(pair.answer),
            confidence: pair.confidence,
            source_id: session.id,
            source: DataSource::Chat,
            context: pair.context,
            metadata: metadata.clone(),
        })
        .collect()
}

#[async_trait]
impl DataExtractor for PgChatExtractor {
    fn source(&self) -> DataSource {
        DataSource::Chat
    }

    async fn extract(&self, criteria: &ExtractionCriteria) -> AppResult<Vec<ExtractedData>> {
        let range = effective_range(criteria);
        let sessions = sqlx::query_as::<_, ChatSessionRow>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM chat_sessions
            WHERE status IN ('closed', 'ended', 'resolved')
              AND ended_at IS NOT NULL
              AND ended_at BETWEEN $1 AND $2
              AND EXTRACT(EPOCH FROM (ended_at - started_at)) >= $3
              AND ($4::float8 IS NULL OR satisfaction_rating IS NULL OR satisfaction_rating >= $4)
              AND ($5::text[] IS NULL OR category = ANY($5))
              AND NOT (COALESCE(category, '') = ANY($6))
            ORDER BY ended_at DESC
            LIMIT $7
            "#
        ))
        .bind(range.start)
        .bind(range.end)
        .bind(criteria.min_session_duration.unwrap_or(0) as f64)
        .bind(criteria.min_satisfaction_score)
        .bind(criteria.categories.as_deref())
        .bind(criteria.excluded_categories.clone().unwrap_or_default())
        .bind(effective_limit(criteria))
        .fetch_all(&self.pool)
        .await?;

        debug!(sessions = sessions.len(), "Loaded chat sessions for extraction");
        self.items_for(sessions).await
    }

    async fn extract_one(&self, source_id: Uuid) -> AppResult<Vec<ExtractedData>> {
        let sessions = sqlx::query_as::<_, ChatSessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = $1 AND ended_at IS NOT NULL"
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        self.items_for(sessions).await
    }
}
