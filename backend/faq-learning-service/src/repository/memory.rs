//! In-process store with the same semantics as the PostgreSQL one.
//! Used by unit and HTTP tests, and handy for local runs without a database.

use super::{
    ConfidenceBuckets, ConfigRepository, FaqEntryFilter, FaqEntryRepository, PatternRepository,
    PipelineStateRepository, SortField, SortOrder,
};
use crate::error::AppResult;
use crate::models::{
    FaqEntrySource, FaqEntryStatus, FaqLearningConfig, LearnedFaqEntry, LearningPattern,
    PatternMatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryLearningStore {
    entries: RwLock<Vec<LearnedFaqEntry>>,
    patterns: RwLock<HashMap<String, LearningPattern>>,
    config: RwLock<BTreeMap<String, FaqLearningConfig>>,
    leases: RwLock<HashMap<String, (Uuid, DateTime<Utc>)>>,
    daily: RwLock<HashMap<NaiveDate, i64>>,
}

impl InMemoryLearningStore {
    pub async fn all_entries(&self) -> Vec<LearnedFaqEntry> {
        self.entries.read().await.clone()
    }

    pub async fn all_patterns(&self) -> Vec<LearningPattern> {
        self.patterns.read().await.values().cloned().collect()
    }

    /// Marks a lease as already expired, as if its holder had stalled
    #[cfg(test)]
    pub(crate) async fn expire_lease(&self, name: &str) {
        if let Some((_, expires_at)) = self.leases.write().await.get_mut(name) {
            *expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

fn sort_entries(entries: &mut [LearnedFaqEntry], field: SortField, order: SortOrder) {
    entries.sort_by(|a, b| {
        let ordering = match field {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::Confidence => a.confidence.cmp(&b.confidence),
            SortField::Category => a.category.cmp(&b.category),
            SortField::HelpfulCount => a.helpful_count.cmp(&b.helpful_count),
        };
        let ordering = match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
impl FaqEntryRepository for InMemoryLearningStore {
    async fn insert_entries(&self, entries: &[LearnedFaqEntry]) -> AppResult<()> {
        self.entries.write().await.extend_from_slice(entries);
        Ok(())
    }

    async fn get_entry(&self, id: Uuid) -> AppResult<Option<LearnedFaqEntry>> {
        Ok(self.entries.read().await.iter().find(|e| e.id == id).cloned())
    }

    async fn update_entry(&self, entry: &LearnedFaqEntry) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry.clone();
        }
        Ok(())
    }

    async fn list_entries(
        &self,
        filter: &FaqEntryFilter,
    ) -> AppResult<(Vec<LearnedFaqEntry>, i64)> {
        let mut matching: Vec<LearnedFaqEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        let total = matching.len() as i64;

        sort_entries(&mut matching, filter.sort_by, filter.sort_order);
        let page = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();

        Ok((page, total))
    }

    async fn source_already_learned(
        &self,
        source: FaqEntrySource,
        source_id: Uuid,
        content_hash: &str,
    ) -> AppResult<bool> {
        Ok(self.entries.read().await.iter().any(|e| {
            e.source == source && e.source_id == source_id && e.content_hash == content_hash
        }))
    }

    async fn count_by_status(&self) -> AppResult<HashMap<FaqEntryStatus, i64>> {
        let mut counts = HashMap::new();
        for entry in self.entries.read().await.iter() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count_created_since(
        &self,
        since: DateTime<Utc>,
        status: Option<FaqEntryStatus>,
        source: Option<FaqEntrySource>,
    ) -> AppResult<i64> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.created_at >= since)
            .filter(|e| status.map_or(true, |s| e.status == s))
            .filter(|e| source.map_or(true, |s| e.source == s))
            .count() as i64)
    }

    async fn average_confidence(&self, status: Option<FaqEntryStatus>) -> AppResult<f64> {
        let entries = self.entries.read().await;
        let scores: Vec<i32> = entries
            .iter()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .map(|e| e.confidence)
            .collect();
        if scores.is_empty() {
            return Ok(0.0);
        }
        Ok(scores.iter().map(|&c| c as f64).sum::<f64>() / scores.len() as f64)
    }

    async fn confidence_buckets(&self) -> AppResult<ConfidenceBuckets> {
        let mut buckets = ConfidenceBuckets::default();
        for entry in self.entries.read().await.iter() {
            match entry.confidence {
                c if c >= 85 => buckets.high += 1,
                c if c >= 60 => buckets.medium += 1,
                _ => buckets.low += 1,
            }
        }
        Ok(buckets)
    }

    async fn recent_entries(&self, limit: i64) -> AppResult<Vec<LearnedFaqEntry>> {
        let mut entries = self.entries.read().await.clone();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn top_categories(
        &self,
        status: Option<FaqEntryStatus>,
        limit: i64,
    ) -> AppResult<Vec<(String, i64)>> {
        let mut counts: HashMap<String, i64> = HashMap::new();
        for entry in self.entries.read().await.iter() {
            if status.map_or(true, |s| entry.status == s) {
                *counts.entry(entry.category.clone()).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(String, i64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit.max(0) as usize);
        Ok(ranked)
    }
}

#[async_trait]
impl PatternRepository for InMemoryLearningStore {
    async fn upsert_pattern(&self, pattern: &PatternMatch) -> AppResult<LearningPattern> {
        let mut patterns = self.patterns.write().await;
        let now = Utc::now();

        let stored = patterns
            .entry(pattern.pattern_hash.clone())
            .and_modify(|existing| {
                for source in &pattern.sources {
                    if !existing.sources.0.contains(source) {
                        existing.sources.0.push(source.clone());
                        existing.frequency += 1;
                    }
                }
                existing.keywords = pattern.keywords.clone();
                existing.updated_at = now;
            })
            .or_insert_with(|| LearningPattern {
                id: Uuid::new_v4(),
                pattern_hash: pattern.pattern_hash.clone(),
                pattern_type: "question".to_string(),
                template: pattern.template.clone(),
                frequency: pattern.sources.len() as i32,
                sources: Json(pattern.sources.clone()),
                keywords: pattern.keywords.clone(),
                category: pattern.category.clone(),
                created_at: now,
                updated_at: now,
            });

        Ok(stored.clone())
    }

    async fn count_patterns(&self, min_frequency: i32) -> AppResult<i64> {
        Ok(self
            .patterns
            .read()
            .await
            .values()
            .filter(|p| p.frequency >= min_frequency)
            .count() as i64)
    }
}

#[async_trait]
impl ConfigRepository for InMemoryLearningStore {
    async fn list_config(&self) -> AppResult<Vec<FaqLearningConfig>> {
        Ok(self
            .config
            .read()
            .await
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect())
    }

    async fn get_config(&self, key: &str) -> AppResult<Option<FaqLearningConfig>> {
        Ok(self
            .config
            .read()
            .await
            .get(key)
            .filter(|c| c.is_active)
            .cloned())
    }

    async fn upsert_config(&self, key: &str, value: &Value) -> AppResult<()> {
        self.config.write().await.insert(
            key.to_string(),
            FaqLearningConfig {
                config_key: key.to_string(),
                config_value: value.clone(),
                is_active: true,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl PipelineStateRepository for InMemoryLearningStore {
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl_secs: i64,
    ) -> AppResult<bool> {
        let mut leases = self.leases.write().await;
        let now = Utc::now();
        match leases.get(name) {
            Some((_, expires_at)) if *expires_at >= now => Ok(false),
            _ => {
                leases.insert(name.to_string(), (holder, now + Duration::seconds(ttl_secs)));
                Ok(true)
            }
        }
    }

    async fn renew_lease(&self, name: &str, holder: Uuid, ttl_secs: i64) -> AppResult<bool> {
        let mut leases = self.leases.write().await;
        match leases.get_mut(name) {
            Some((current, expires_at)) if *current == holder => {
                *expires_at = Utc::now() + Duration::seconds(ttl_secs);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, name: &str, holder: Uuid) -> AppResult<()> {
        let mut leases = self.leases.write().await;
        if leases.get(name).is_some_and(|(h, _)| *h == holder) {
            leases.remove(name);
        }
        Ok(())
    }

    async fn daily_processed(&self, day: NaiveDate) -> AppResult<i64> {
        Ok(self.daily.read().await.get(&day).copied().unwrap_or(0))
    }

    async fn add_daily_processed(&self, day: NaiveDate, count: i64) -> AppResult<i64> {
        let mut daily = self.daily.write().await;
        let total = daily.entry(day).or_insert(0);
        *total += count;
        Ok(*total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataSource, PatternSource};

    fn pattern_with(item_ids: &[&str], source_id: Uuid) -> PatternMatch {
        PatternMatch {
            pattern_hash: "deadbeefdeadbeef".to_string(),
            template: "how do i reset my password".to_string(),
            frequency: item_ids.len(),
            similarity: 1.0,
            keywords: vec!["password".to_string()],
            category: "authentication".to_string(),
            sources: item_ids
                .iter()
                .map(|id| PatternSource {
                    source: DataSource::Chat,
                    source_id,
                    item_id: id.to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_upsert_pattern_counts_only_new_sources() {
        let store = InMemoryLearningStore::default();
        let session = Uuid::new_v4();

        let first = store
            .upsert_pattern(&pattern_with(&["a", "b"], session))
            .await
            .unwrap();
        assert_eq!(first.frequency, 2);

        let second = store
            .upsert_pattern(&pattern_with(&["b", "c"], session))
            .await
            .unwrap();
        assert_eq!(second.frequency, 3);
        assert_eq!(second.sources.0.len(), 3);
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_released() {
        let store = InMemoryLearningStore::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(store.try_acquire_lease("pipeline", a, 60).await.unwrap());
        assert!(!store.try_acquire_lease("pipeline", b, 60).await.unwrap());

        // Only the holder can release
        store.release_lease("pipeline", b).await.unwrap();
        assert!(!store.try_acquire_lease("pipeline", b, 60).await.unwrap());

        store.release_lease("pipeline", a).await.unwrap();
        assert!(store.try_acquire_lease("pipeline", b, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let store = InMemoryLearningStore::default();
        assert!(store
            .try_acquire_lease("pipeline", Uuid::new_v4(), -1)
            .await
            .unwrap());
        assert!(store
            .try_acquire_lease("pipeline", Uuid::new_v4(), 60)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_renewal_only_for_current_holder() {
        let store = InMemoryLearningStore::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(store.try_acquire_lease("pipeline", a, -1).await.unwrap());
        assert!(store.try_acquire_lease("pipeline", b, 60).await.unwrap());
        assert!(!store.renew_lease("pipeline", a, 60).await.unwrap());
        assert!(store.renew_lease("pipeline", b, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_daily_counter_is_per_day() {
        let store = InMemoryLearningStore::default();
        let today = Utc::now().date_naive();
        let yesterday = today - Duration::days(1);

        store.add_daily_processed(yesterday, 900).await.unwrap();
        assert_eq!(store.add_daily_processed(today, 10).await.unwrap(), 10);
        assert_eq!(store.add_daily_processed(today, 5).await.unwrap(), 15);
        assert_eq!(store.daily_processed(yesterday).await.unwrap(), 900);
    }
}
