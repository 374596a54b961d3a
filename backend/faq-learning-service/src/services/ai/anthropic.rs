use super::{build_prompt, parse_completion, FaqAiProvider, FaqGenerationRequest, GeneratedFaq, SYSTEM_PROMPT};
use crate::config::AiProviderConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: HttpClient,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(config: &AiProviderConfig, timeout: Duration) -> AppResult<Self> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::AiProvider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl FaqAiProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn generate_faq_answer(&self, request: &FaqGenerationRequest) -> AppResult<GeneratedFaq> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            AppError::AiProvider("Anthropic API key is not configured".to_string())
        })?;
        let started = Instant::now();
        let prompt = build_prompt(request);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            // Anthropic accepts 0..=1
            temperature: request.temperature.clamp(0.0, 1.0),
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: &prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::AiProvider(format!("Anthropic API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::AiProvider(format!(
                "Anthropic API error ({}): {}",
                status, error_text
            )));
        }

        let result: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AppError::AiProvider(format!("Anthropic parse error: {}", e)))?;

        let content = result
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if content.trim().is_empty() {
            return Err(AppError::AiProvider(
                "Anthropic returned an empty completion".to_string(),
            ));
        }

        debug!(model = %self.model, "Anthropic completion received");
        Ok(parse_completion(&content, self.name(), &self.model, started))
    }

    async fn test_connection(&self) -> bool {
        let Some(api_key) = self.api_key.as_deref() else {
            return false;
        };
        match self
            .client
            .get(format!("{}/models", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Anthropic connection test failed");
                false
            }
        }
    }
}
