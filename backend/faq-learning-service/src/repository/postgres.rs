use super::{
    ConfidenceBuckets, ConfigRepository, FaqEntryFilter, FaqEntryRepository, PatternRepository,
    PipelineStateRepository, SortOrder,
};
use crate::error::AppResult;
use crate::models::{
    FaqEntrySource, FaqEntryStatus, FaqLearningConfig, LearnedFaqEntry, LearningPattern,
    PatternMatch,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "id, question, answer, confidence, status, source, source_id, \
    content_hash, category, keywords, metadata, helpful_count, not_helpful_count, \
    reviewed_by, reviewed_at, review_notes, published_at, created_at, updated_at";

/// PostgreSQL-backed learning store
pub struct PgLearningStore {
    pool: PgPool,
}

impl PgLearningStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a FaqEntryFilter) {
        builder.push(" WHERE TRUE");
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(min) = filter.min_confidence {
            builder.push(" AND confidence >= ").push_bind(min);
        }
        if let Some(max) = filter.max_confidence {
            builder.push(" AND confidence <= ").push_bind(max);
        }
        if let Some(source) = filter.source {
            builder.push(" AND source = ").push_bind(source);
        }
        if let Some(category) = filter.category.as_deref() {
            builder.push(" AND category = ").push_bind(category);
        }
        if let Some(term) = filter.search.as_deref() {
            let pattern = format!("%{}%", term.replace('%', "\\%").replace('_', "\\_"));
            builder
                .push(" AND (question ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR answer ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

#[async_trait]
impl FaqEntryRepository for PgLearningStore {
    async fn insert_entries(&self, entries: &[LearnedFaqEntry]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO learned_faq_entries (
                    id, question, answer, confidence, status, source, source_id,
                    content_hash, category, keywords, metadata, helpful_count,
                    not_helpful_count, reviewed_by, reviewed_at, review_notes,
                    published_at, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
                "#,
            )
            .bind(entry.id)
            .bind(&entry.question)
            .bind(&entry.answer)
            .bind(entry.confidence)
            .bind(entry.status)
            .bind(entry.source)
            .bind(entry.source_id)
            .bind(&entry.content_hash)
            .bind(&entry.category)
            .bind(&entry.keywords)
            .bind(&entry.metadata)
            .bind(entry.helpful_count)
            .bind(entry.not_helpful_count)
            .bind(entry.reviewed_by)
            .bind(entry.reviewed_at)
            .bind(&entry.review_notes)
            .bind(entry.published_at)
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_entry(&self, id: Uuid) -> AppResult<Option<LearnedFaqEntry>> {
        let entry = sqlx::query_as::<_, LearnedFaqEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM learned_faq_entries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn update_entry(&self, entry: &LearnedFaqEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE learned_faq_entries
            SET question = $2, answer = $3, confidence = $4, status = $5, category = $6,
                keywords = $7, metadata = $8, helpful_count = $9, not_helpful_count = $10,
                reviewed_by = $11, reviewed_at = $12, review_notes = $13,
                published_at = $14, updated_at = $15
            WHERE id = $1
            "#,
        )
        .bind(entry.id)
        .bind(&entry.question)
        .bind(&entry.answer)
        .bind(entry.confidence)
        .bind(entry.status)
        .bind(&entry.category)
        .bind(&entry.keywords)
        .bind(&entry.metadata)
        .bind(entry.helpful_count)
        .bind(entry.not_helpful_count)
        .bind(entry.reviewed_by)
        .bind(entry.reviewed_at)
        .bind(&entry.review_notes)
        .bind(entry.published_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_entries(
        &self,
        filter: &FaqEntryFilter,
    ) -> AppResult<(Vec<LearnedFaqEntry>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM learned_faq_entries");
        Self::push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ENTRY_COLUMNS} FROM learned_faq_entries"
        ));
        Self::push_filters(&mut select, filter);
        // Sort column comes from a closed enum, never from user text
        select.push(format!(
            " ORDER BY {} {}, id",
            filter.sort_by.column(),
            match filter.sort_order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            }
        ));
        select.push(" LIMIT ").push_bind(filter.limit);
        select.push(" OFFSET ").push_bind(filter.offset);

        let entries = select
            .build_query_as::<LearnedFaqEntry>()
            .fetch_all(&self.pool)
            .await?;

        Ok((entries, total))
    }

    async fn source_already_learned(
        &self,
        source: FaqEntrySource,
        source_id: Uuid,
        content_hash: &str,
    ) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM learned_faq_entries
                WHERE source = $1 AND source_id = $2 AND content_hash = $3
            )
            "#,
        )
        .bind(source)
        .bind(source_id)
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn count_by_status(&self) -> AppResult<HashMap<FaqEntryStatus, i64>> {
        let rows: Vec<(FaqEntryStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM learned_faq_entries GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn count_created_since(
        &self,
        since: DateTime<Utc>,
        status: Option<FaqEntryStatus>,
        source: Option<FaqEntrySource>,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM learned_faq_entries
            WHERE created_at >= $1
              AND ($2::faq_entry_status IS NULL OR status = $2)
              AND ($3::faq_entry_source IS NULL OR source = $3)
            "#,
        )
        .bind(since)
        .bind(status)
        .bind(source)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn average_confidence(&self, status: Option<FaqEntryStatus>) -> AppResult<f64> {
        let avg: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(confidence)::float8 FROM learned_faq_entries
            WHERE ($1::faq_entry_status IS NULL OR status = $1)
            "#,
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok(avg.unwrap_or(0.0))
    }

    async fn confidence_buckets(&self) -> AppResult<ConfidenceBuckets> {
        let (high, medium, low): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE confidence >= 85),
                COUNT(*) FILTER (WHERE confidence >= 60 AND confidence < 85),
                COUNT(*) FILTER (WHERE confidence < 60)
            FROM learned_faq_entries
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ConfidenceBuckets { high, medium, low })
    }

    async fn recent_entries(&self, limit: i64) -> AppResult<Vec<LearnedFaqEntry>> {
        let entries = sqlx::query_as::<_, LearnedFaqEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM learned_faq_entries ORDER BY updated_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn top_categories(
        &self,
        status: Option<FaqEntryStatus>,
        limit: i64,
    ) -> AppResult<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT category, COUNT(*) AS count FROM learned_faq_entries
            WHERE ($1::faq_entry_status IS NULL OR status = $1)
            GROUP BY category
            ORDER BY count DESC, category
            LIMIT $2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl PatternRepository for PgLearningStore {
    async fn upsert_pattern(&self, pattern: &PatternMatch) -> AppResult<LearningPattern> {
        // Sources already recorded for this pattern are not counted twice
        let stored = sqlx::query_as::<_, LearningPattern>(
            r#"
            INSERT INTO learning_patterns (
                id, pattern_hash, pattern_type, template, frequency, sources, keywords,
                category, created_at, updated_at
            )
            VALUES ($1, $2, 'question', $3, $4, $5, $6, $7, NOW(), NOW())
            ON CONFLICT (pattern_hash) DO UPDATE SET
                frequency = learning_patterns.frequency + (
                    SELECT COUNT(*)::int FROM jsonb_array_elements(EXCLUDED.sources) AS s(elem)
                    WHERE NOT learning_patterns.sources @> jsonb_build_array(s.elem)
                ),
                sources = learning_patterns.sources || (
                    SELECT COALESCE(jsonb_agg(s.elem), '[]'::jsonb)
                    FROM jsonb_array_elements(EXCLUDED.sources) AS s(elem)
                    WHERE NOT learning_patterns.sources @> jsonb_build_array(s.elem)
                ),
                keywords = EXCLUDED.keywords,
                updated_at = NOW()
            RETURNING id, pattern_hash, pattern_type, template, frequency, sources, keywords,
                      category, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&pattern.pattern_hash)
        .bind(&pattern.template)
        .bind(pattern.sources.len() as i32)
        .bind(Json(&pattern.sources))
        .bind(&pattern.keywords)
        .bind(&pattern.category)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn count_patterns(&self, min_frequency: i32) -> AppResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM learning_patterns WHERE frequency >= $1")
                .bind(min_frequency)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}

#[async_trait]
impl ConfigRepository for PgLearningStore {
    async fn list_config(&self) -> AppResult<Vec<FaqLearningConfig>> {
        let rows = sqlx::query_as::<_, FaqLearningConfig>(
            r#"
            SELECT config_key, config_value, is_active, updated_at
            FROM faq_learning_config
            WHERE is_active = TRUE
            ORDER BY config_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn get_config(&self, key: &str) -> AppResult<Option<FaqLearningConfig>> {
        let row = sqlx::query_as::<_, FaqLearningConfig>(
            r#"
            SELECT config_key, config_value, is_active, updated_at
            FROM faq_learning_config
            WHERE config_key = $1 AND is_active = TRUE
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert_config(&self, key: &str, value: &Value) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO faq_learning_config (config_key, config_value, is_active, updated_at)
            VALUES ($1, $2, TRUE, NOW())
            ON CONFLICT (config_key) DO UPDATE SET
                config_value = EXCLUDED.config_value,
                is_active = TRUE,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PipelineStateRepository for PgLearningStore {
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl_secs: i64,
    ) -> AppResult<bool> {
        let acquired: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO faq_learning_leases (name, holder, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (name) DO UPDATE SET
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at
            WHERE faq_learning_leases.expires_at < NOW()
            RETURNING holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(ttl_secs as f64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired == Some(holder))
    }

    async fn renew_lease(&self, name: &str, holder: Uuid, ttl_secs: i64) -> AppResult<bool> {
        let renewed = sqlx::query(
            r#"
            UPDATE faq_learning_leases
            SET expires_at = NOW() + make_interval(secs => $3)
            WHERE name = $1 AND holder = $2
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(ttl_secs as f64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(renewed == 1)
    }

    async fn release_lease(&self, name: &str, holder: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM faq_learning_leases WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn daily_processed(&self, day: NaiveDate) -> AppResult<i64> {
        let processed: Option<i64> = sqlx::query_scalar(
            "SELECT processed FROM faq_learning_daily_counters WHERE day = $1",
        )
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;

        Ok(processed.unwrap_or(0))
    }

    async fn add_daily_processed(&self, day: NaiveDate, count: i64) -> AppResult<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO faq_learning_daily_counters (day, processed)
            VALUES ($1, $2)
            ON CONFLICT (day) DO UPDATE SET
                processed = faq_learning_daily_counters.processed + EXCLUDED.processed
            RETURNING processed
            "#,
        )
        .bind(day)
        .bind(count)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }
}
