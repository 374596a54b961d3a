// ============================================
// AI providers for FAQ answer generation
// ============================================
//
// Providers are looked up by name. Generation goes to the current provider;
// when it fails, the first other provider that answers a connection test
// gets exactly one retry.

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use crate::error::{AppError, AppResult};
use crate::metrics::METRICS;
use crate::models::learning_config::AI_PROVIDER_KEY;
use crate::repository::ConfigRepository;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str =
    "You are an expert FAQ writer. Turn support conversations into clear, reusable FAQ entries.";
const FALLBACK_CONFIDENCE: i32 = 75;
const FALLBACK_CATEGORY: &str = "General";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqGenerationRequest {
    pub context: String,
    pub question_pattern: Option<String>,
    pub answer_pattern: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFaq {
    pub question: Option<String>,
    pub answer: String,
    pub confidence: i32,
    pub keywords: Vec<String>,
    pub category: String,
    pub provider: String,
    pub model: String,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub name: String,
    pub model: String,
    pub available: bool,
    pub current: bool,
    pub response_time_ms: Option<u64>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FaqAiProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn model(&self) -> String;

    async fn generate_faq_answer(&self, request: &FaqGenerationRequest) -> AppResult<GeneratedFaq>;

    /// Cheap authenticated round trip to the vendor
    async fn test_connection(&self) -> bool;
}

pub(crate) fn build_prompt(request: &FaqGenerationRequest) -> String {
    let mut prompt = format!(
        "Generate an FAQ entry from the following support conversation.\n\nContext: {}\n",
        request.context
    );
    if let Some(question) = &request.question_pattern {
        prompt.push_str(&format!("Question pattern: {}\n", question));
    }
    if let Some(answer) = &request.answer_pattern {
        prompt.push_str(&format!("Answer pattern: {}\n", answer));
    }
    prompt.push_str(
        r#"
Respond with JSON only, using this structure:
{
  "question": "Clear, concise question a customer would ask",
  "answer": "Complete, helpful answer",
  "confidence": 85,
  "keywords": ["keyword1", "keyword2", "keyword3"],
  "category": "category_name"
}

The entry must be easy to understand, concise and correctly categorised."#,
    );
    prompt
}

#[derive(Debug, Deserialize)]
struct RawFaq {
    question: Option<String>,
    answer: Option<String>,
    confidence: Option<f64>,
    keywords: Option<Vec<String>>,
    category: Option<String>,
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Top five words longer than three characters, by frequency
pub(crate) fn fallback_keywords(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();

    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in cleaned.split_whitespace().filter(|w| w.chars().count() > 3) {
        let count = counts.entry(word).or_insert(0);
        if *count == 0 {
            order.push(word);
        }
        *count += 1;
    }
    // Stable sort keeps first-seen order among ties
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.into_iter().take(5).map(str::to_string).collect()
}

/// Turn raw completion text into an FAQ, tolerating non-JSON replies
pub(crate) fn parse_completion(
    content: &str,
    provider: &str,
    model: &str,
    started: Instant,
) -> GeneratedFaq {
    let raw = serde_json::from_str::<RawFaq>(strip_code_fence(content)).ok();
    let (question, answer, confidence, keywords, category) = match raw {
        Some(raw) => (
            raw.question.filter(|q| !q.trim().is_empty()),
            raw.answer.filter(|a| !a.trim().is_empty()),
            raw.confidence,
            raw.keywords.filter(|k| !k.is_empty()),
            raw.category.filter(|c| !c.trim().is_empty()),
        ),
        None => (None, None, None, None, None),
    };

    GeneratedFaq {
        question,
        answer: answer.unwrap_or_else(|| content.trim().to_string()),
        confidence: confidence
            .filter(|c| *c > 0.0)
            .map(|c| c.round().clamp(0.0, 100.0) as i32)
            .unwrap_or(FALLBACK_CONFIDENCE),
        keywords: keywords.unwrap_or_else(|| fallback_keywords(content)),
        category: category.unwrap_or_else(|| FALLBACK_CATEGORY.to_string()),
        provider: provider.to_string(),
        model: model.to_string(),
        processing_time_ms: started.elapsed().as_millis() as u64,
    }
}

/// Registry of providers plus the persisted current-provider pointer
pub struct FaqAiService {
    providers: BTreeMap<String, Arc<dyn FaqAiProvider>>,
    current: RwLock<String>,
    config: Arc<dyn ConfigRepository>,
}

impl FaqAiService {
    pub fn new(
        providers: Vec<Arc<dyn FaqAiProvider>>,
        default_provider: &str,
        config: Arc<dyn ConfigRepository>,
    ) -> Self {
        let providers: BTreeMap<String, Arc<dyn FaqAiProvider>> = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Self {
            providers,
            current: RwLock::new(default_provider.to_string()),
            config,
        }
    }

    /// Restore the provider chosen before the last restart
    pub async fn load_persisted_provider(&self) -> AppResult<()> {
        if let Some(row) = self.config.get_config(AI_PROVIDER_KEY).await? {
            if let Some(name) = row.config_value.as_str() {
                if self.providers.contains_key(name) {
                    *self.current.write().await = name.to_string();
                    info!(provider = %name, "Restored persisted AI provider");
                } else {
                    warn!(provider = %name, "Persisted AI provider is not registered");
                }
            }
        }
        Ok(())
    }

    pub async fn current_provider(&self) -> String {
        self.current.read().await.clone()
    }

    pub async fn generate_faq_answer(
        &self,
        request: &FaqGenerationRequest,
    ) -> AppResult<GeneratedFaq> {
        let current = self.current_provider().await;

        let primary_error = match self.providers.get(&current) {
            Some(provider) => match provider.generate_faq_answer(request).await {
                Ok(faq) => {
                    METRICS
                        .ai_requests
                        .with_label_values(&[current.as_str(), "success"])
                        .inc();
                    return Ok(faq);
                }
                Err(e) => {
                    METRICS
                        .ai_requests
                        .with_label_values(&[current.as_str(), "failure"])
                        .inc();
                    warn!(provider = %current, error = %e, "AI generation failed");
                    e
                }
            },
            None => AppError::AiProvider(format!("provider {current} is not registered")),
        };

        for (name, provider) in self.providers.iter().filter(|(n, _)| **n != current) {
            if !provider.test_connection().await {
                continue;
            }
            info!(from = %current, to = %name, "Retrying FAQ generation on fallback provider");
            METRICS.ai_fallbacks.inc();
            let result = provider.generate_faq_answer(request).await;
            let outcome = if result.is_ok() { "success" } else { "failure" };
            METRICS
                .ai_requests
                .with_label_values(&[name.as_str(), outcome])
                .inc();
            return result;
        }

        Err(primary_error)
    }

    /// Returns false, leaving the current provider untouched, when `name` is
    /// unknown or fails its connection test
    pub async fn switch_provider(&self, name: &str) -> AppResult<bool> {
        let Some(provider) = self.providers.get(name) else {
            warn!(provider = %name, "Cannot switch to unknown AI provider");
            return Ok(false);
        };
        if !provider.test_connection().await {
            warn!(provider = %name, "Cannot switch to unavailable AI provider");
            return Ok(false);
        }

        self.config.upsert_config(AI_PROVIDER_KEY, &json!(name)).await?;
        *self.current.write().await = name.to_string();
        info!(provider = %name, "Switched AI provider");
        Ok(true)
    }

    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        let current = self.current_provider().await;
        let checks = self.providers.iter().map(|(name, provider)| {
            let is_current = *name == current;
            async move {
                let started = Instant::now();
                let available = provider.test_connection().await;
                ProviderStatus {
                    name: name.clone(),
                    model: provider.model(),
                    available,
                    current: is_current,
                    response_time_ms: available.then(|| started.elapsed().as_millis() as u64),
                }
            }
        });
        futures::future::join_all(checks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryLearningStore;

    fn request() -> FaqGenerationRequest {
        FaqGenerationRequest {
            context: "Question: How do I reset my password?".to_string(),
            question_pattern: Some("How do I reset my password?".to_string()),
            answer_pattern: None,
            temperature: 0.7,
            max_tokens: 500,
        }
    }

    fn generated(provider: &str) -> GeneratedFaq {
        GeneratedFaq {
            question: None,
            answer: "Use the reset link on the sign-in page.".to_string(),
            confidence: 88,
            keywords: vec!["password".to_string()],
            category: "authentication".to_string(),
            provider: provider.to_string(),
            model: "test-model".to_string(),
            processing_time_ms: 1,
        }
    }

    fn provider(name: &'static str, available: bool) -> MockFaqAiProvider {
        let mut mock = MockFaqAiProvider::new();
        mock.expect_name().return_const(name);
        mock.expect_model().returning(|| "test-model".to_string());
        mock.expect_test_connection().returning(move || available);
        mock
    }

    #[test]
    fn test_parse_json_completion() {
        let content = r#"```json
{"question":"How do I reset my password?","answer":"Click Forgot password on the sign-in page.","confidence":91,"keywords":["password","reset"],"category":"authentication"}
```"#;
        let faq = parse_completion(content, "openai", "gpt-4o-mini", Instant::now());
        assert_eq!(faq.question.as_deref(), Some("How do I reset my password?"));
        assert_eq!(faq.confidence, 91);
        assert_eq!(faq.category, "authentication");
        assert_eq!(faq.keywords, vec!["password", "reset"]);
    }

    #[test]
    fn test_parse_plain_text_falls_back() {
        let content = "Open billing settings. Billing settings list every invoice you received.";
        let faq = parse_completion(content, "anthropic", "claude", Instant::now());
        assert_eq!(faq.answer, content);
        assert_eq!(faq.confidence, 75);
        assert_eq!(faq.category, "General");
        assert_eq!(faq.keywords[0], "billing");
        assert_eq!(faq.keywords[1], "settings");
        assert!(faq.keywords.len() <= 5);
    }

    #[test]
    fn test_prompt_mentions_patterns() {
        let prompt = build_prompt(&request());
        assert!(prompt.contains("Question pattern: How do I reset my password?"));
        assert!(!prompt.contains("Answer pattern"));
        assert!(prompt.contains("\"keywords\""));
    }

    #[tokio::test]
    async fn test_generation_uses_current_provider() {
        let mut openai = provider("openai", true);
        openai
            .expect_generate_faq_answer()
            .times(1)
            .returning(|_| Ok(generated("openai")));
        let mut anthropic = provider("anthropic", true);
        anthropic.expect_generate_faq_answer().times(0);

        let service = FaqAiService::new(
            vec![Arc::new(openai), Arc::new(anthropic)],
            "openai",
            Arc::new(InMemoryLearningStore::default()),
        );
        let faq = service.generate_faq_answer(&request()).await.unwrap();
        assert_eq!(faq.provider, "openai");
    }

    #[tokio::test]
    async fn test_generation_falls_back_once() {
        let mut openai = provider("openai", true);
        openai
            .expect_generate_faq_answer()
            .times(1)
            .returning(|_| Err(AppError::AiProvider("rate limited".to_string())));
        let mut anthropic = provider("anthropic", true);
        anthropic
            .expect_generate_faq_answer()
            .times(1)
            .returning(|_| Ok(generated("anthropic")));

        let service = FaqAiService::new(
            vec![Arc::new(openai), Arc::new(anthropic)],
            "openai",
            Arc::new(InMemoryLearningStore::default()),
        );
        let faq = service.generate_faq_answer(&request()).await.unwrap();
        assert_eq!(faq.provider, "anthropic");
    }

    #[tokio::test]
    async fn test_no_fallback_when_others_unavailable() {
        let mut openai = provider("openai", true);
        openai
            .expect_generate_faq_answer()
            .times(1)
            .returning(|_| Err(AppError::AiProvider("timeout".to_string())));
        let mut anthropic = provider("anthropic", false);
        anthropic.expect_generate_faq_answer().times(0);

        let service = FaqAiService::new(
            vec![Arc::new(openai), Arc::new(anthropic)],
            "openai",
            Arc::new(InMemoryLearningStore::default()),
        );
        let err = service.generate_faq_answer(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::AiProvider(msg) if msg == "timeout"));
    }

    #[tokio::test]
    async fn test_switch_to_unavailable_provider_keeps_current() {
        let store = Arc::new(InMemoryLearningStore::default());
        let service = FaqAiService::new(
            vec![
                Arc::new(provider("openai", true)),
                Arc::new(provider("anthropic", false)),
            ],
            "openai",
            store.clone(),
        );

        assert!(!service.switch_provider("anthropic").await.unwrap());
        assert!(!service.switch_provider("mistral").await.unwrap());
        assert_eq!(service.current_provider().await, "openai");
        assert!(store.get_config(AI_PROVIDER_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_switch_persists_choice() {
        let store = Arc::new(InMemoryLearningStore::default());
        let service = FaqAiService::new(
            vec![
                Arc::new(provider("openai", true)),
                Arc::new(provider("anthropic", true)),
            ],
            "openai",
            store.clone(),
        );

        assert!(service.switch_provider("anthropic").await.unwrap());
        assert_eq!(service.current_provider().await, "anthropic");

        let restarted = FaqAiService::new(
            vec![
                Arc::new(provider("openai", true)),
                Arc::new(provider("anthropic", true)),
            ],
            "openai",
            store,
        );
        restarted.load_persisted_provider().await.unwrap();
        assert_eq!(restarted.current_provider().await, "anthropic");
    }

    #[tokio::test]
    async fn test_provider_status_marks_current() {
        let service = FaqAiService::new(
            vec![
                Arc::new(provider("openai", true)),
                Arc::new(provider("anthropic", false)),
            ],
            "openai",
            Arc::new(InMemoryLearningStore::default()),
        );
        let status = service.provider_status().await;
        assert_eq!(status.len(), 2);
        let openai = status.iter().find(|s| s.name == "openai").unwrap();
        assert!(openai.available && openai.current);
        let anthropic = status.iter().find(|s| s.name == "anthropic").unwrap();
        assert!(!anthropic.available && !anthropic.current);
        assert!(anthropic.response_time_ms.is_none());
    }
}
