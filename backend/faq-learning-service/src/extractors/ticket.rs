use super::{effective_limit, effective_range, DataExtractor};
use crate::error::AppResult;
use crate::models::{DataSource, ExtractedData, ExtractionCriteria, SenderType, SourceMetadata};
use crate::services::pattern_recognition::{is_answer, is_question};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

const TICKET_COLUMNS: &str =
    "id, subject, description, category, tags, satisfaction_rating, created_at, resolved_at";

#[derive(Debug, Clone, FromRow)]
pub(crate) struct TicketRow {
    pub id: Uuid,
    pub subject: String,
    pub description: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub satisfaction_rating: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct TicketMessageRow {
    pub ticket_id: Uuid,
    pub author_type: String,
    pub body: String,
}

/// Resolved tickets: the customer's request against the first public agent reply
pub struct PgTicketExtractor {
    pool: PgPool,
}

impl PgTicketExtractor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn items_for(&self, tickets: Vec<TicketRow>) -> AppResult<Vec<ExtractedData>> {
        let ids: Vec<Uuid> = tickets.iter().map(|t| t.id).collect();
        let rows = sqlx::query_as::<_, TicketMessageRow>(
            r#"
            SELECT ticket_id, author_type, body
            FROM ticket_messages
            WHERE ticket_id = ANY($1) AND is_internal = FALSE
            ORDER BY ticket_id, created_at
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut threads: HashMap<Uuid, Vec<TicketMessageRow>> = HashMap::new();
        for row in rows {
            threads.entry(row.ticket_id).or_default().push(row);
        }

        Ok(tickets
            .iter()
            .filter_map(|ticket| {
                let thread = threads.remove(&ticket.id).unwrap_or_default();
                ticket_item(ticket, &thread)
            })
            .collect())
    }
}

fn pair_confidence(question: &str, answer: &str, satisfaction: Option<f64>) -> i32 {
    let mut confidence = 60;
    if is_question(question) {
        confidence += 10;
    }
    if is_answer(answer) {
        confidence += 15;
    }
    if satisfaction.is_some_and(|s| s >= 4.0) {
        confidence += 10;
    }
    confidence.min(100)
}

/// `None` when no agent ever replied publicly
pub(crate) fn ticket_item(ticket: &TicketRow, thread: &[TicketMessageRow]) -> Option<ExtractedData> {
    let answer = thread
        .iter()
        .find(|m| SenderType::parse(&m.author_type).is_responder() && !m.body.trim().is_empty())?
        .body
        .clone();

    let subject = ticket.subject.trim();
    let description = ticket.description.trim();
    let (question, context) = if is_question(subject) || description.is_empty() {
        (subject, description)
    } else {
        (description, subject)
    };
    if question.is_empty() {
        return None;
    }

    let resolved_at = ticket.resolved_at.unwrap_or_else(Utc::now);
    Some(ExtractedData {
        id: format!("ticket:{}", ticket.id),
        question: question.to_string(),
        confidence: pair_confidence(question, &answer, ticket.satisfaction_rating),
        answer: Some(answer),
        source_id: ticket.id,
        source: DataSource::Ticket,
        context: (!context.is_empty()).then(|| context.to_string()),
        metadata: SourceMetadata {
            session_duration: None,
            resolution_time: Some((resolved_at - ticket.created_at).num_seconds().max(0)),
            satisfaction_score: ticket.satisfaction_rating,
            is_resolved: true,
            category: ticket.category.clone(),
            tags: ticket.tags.clone(),
            message_count: Some(thread.len() as i64),
            timestamp: resolved_at,
        },
    })
}

#[async_trait]
impl DataExtractor for PgTicketExtractor {
    fn source(&self) -> DataSource {
        DataSource::Ticket
    }

    async fn extract(&self, criteria: &ExtractionCriteria) -> AppResult<Vec<ExtractedData>> {
        let range = effective_range(criteria);
        let tickets = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            SELECT {TICKET_COLUMNS}
            FROM tickets
            WHERE status IN ('resolved', 'closed')
              AND resolved_at IS NOT NULL
              AND resolved_at BETWEEN $1 AND $2
              AND EXTRACT(EPOCH FROM (resolved_at - created_at)) >= $3
              AND ($4::float8 IS NULL OR satisfaction_rating IS NULL OR satisfaction_rating >= $4)
              AND ($5::text[] IS NULL OR category = ANY($5))
              AND NOT (COALESCE(category, '') = ANY($6))
            ORDER BY resolved_at DESC
            LIMIT $7
            "#
        ))
        .bind(range.start)
        .bind(range.end)
        .bind(criteria.min_resolution_time.unwrap_or(0) as f64)
        .bind(criteria.min_satisfaction_score)
        .bind(criteria.categories.as_deref())
        .bind(criteria.excluded_categories.clone().unwrap_or_default())
        .bind(effective_limit(criteria))
        .fetch_all(&self.pool)
        .await?;

        debug!(tickets = tickets.len(), "Loaded resolved tickets for extraction");
        self.items_for(tickets).await
    }

    async fn extract_one(&self, source_id: Uuid) -> AppResult<Vec<ExtractedData>> {
        let tickets = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1 AND resolved_at IS NOT NULL"
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        self.items_for(tickets).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ticket(subject: &str, description: &str) -> TicketRow {
        let created = Utc::now() - Duration::hours(3);
        TicketRow {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            description: description.to_string(),
            category: Some("billing".to_string()),
            tags: vec![],
            satisfaction_rating: Some(4.0),
            created_at: created,
            resolved_at: Some(created + Duration::hours(2)),
        }
    }

    fn reply(ticket_id: Uuid, author: &str, body: &str) -> TicketMessageRow {
        TicketMessageRow {
            ticket_id,
            author_type: author.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_question_subject_with_agent_reply() {
        let t = ticket(
            "How do I get a refund for a duplicate charge?",
            "I was charged twice this month.",
        );
        let thread = vec![
            reply(t.id, "customer", "Any update?"),
            reply(
                t.id,
                "agent",
                "You can request it under Billing, then Payments. Refunds take 5 days.",
            ),
        ];

        let item = ticket_item(&t, &thread).unwrap();
        assert_eq!(item.question, "How do I get a refund for a duplicate charge?");
        assert_eq!(item.context.as_deref(), Some("I was charged twice this month."));
        assert_eq!(item.metadata.resolution_time, Some(7200));
        assert!(item.metadata.is_resolved);
        assert_eq!(item.confidence, 95);
    }

    #[test]
    fn test_plain_subject_uses_description() {
        let t = ticket("Invoice", "Where can I find the invoice for my March payment?");
        let thread = vec![reply(t.id, "agent", "Go to Billing and open Invoices.")];
        let item = ticket_item(&t, &thread).unwrap();
        assert_eq!(item.question, "Where can I find the invoice for my March payment?");
        assert_eq!(item.context.as_deref(), Some("Invoice"));
    }

    #[test]
    fn test_ticket_without_agent_reply_is_skipped() {
        let t = ticket("Why is my app slow?", "");
        let thread = vec![reply(t.id, "customer", "Hello?")];
        assert!(ticket_item(&t, &thread).is_none());
    }
}
