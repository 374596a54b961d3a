use super::{build_prompt, parse_completion, FaqAiProvider, FaqGenerationRequest, GeneratedFaq, SYSTEM_PROMPT};
use crate::config::AiProviderConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

pub struct OpenAiProvider {
    client: HttpClient,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
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

    fn api_key(&self) -> AppResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AppError::AiProvider("OpenAI API key is not configured".to_string()))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl FaqAiProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn generate_faq_answer(&self, request: &FaqGenerationRequest) -> AppResult<GeneratedFaq> {
        let api_key = self.api_key()?;
        let started = Instant::now();
        let prompt = build_prompt(request);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::AiProvider(format!("OpenAI API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::AiProvider(format!(
                "OpenAI API error ({}): {}",
                status, error_text
            )));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::AiProvider(format!("OpenAI parse error: {}", e)))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::AiProvider("OpenAI returned an empty completion".to_string()))?;

        debug!(model = %self.model, "OpenAI completion received");
        Ok(parse_completion(&content, self.name(), &self.model, started))
    }

    async fn test_connection(&self) -> bool {
        let Ok(api_key) = self.api_key() else {
            return false;
        };
        match self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "OpenAI connection test failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, api_key: Option<&str>) -> OpenAiProvider {
        OpenAiProvider::new(
            &AiProviderConfig {
                api_key: api_key.map(str::to_string),
                model: "gpt-4o-mini".to_string(),
                base_url: server.uri(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn request() -> FaqGenerationRequest {
        FaqGenerationRequest {
            context: "Customer could not find where to download invoices".to_string(),
            question_pattern: Some("Where can I download my invoice?".to_string()),
            answer_pattern: None,
            temperature: 0.7,
            max_tokens: 400,
        }
    }

    #[tokio::test]
    async fn test_generate_parses_json_completion() {
        let server = MockServer::start().await;
        let completion = json!({
            "question": "Where can I download my invoice?",
            "answer": "Go to Billing and select Invoices to download any invoice as PDF.",
            "confidence": 87,
            "keywords": ["invoice", "download"],
            "category": "billing"
        });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini", "max_tokens": 400})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": completion.to_string()}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let faq = provider(&server, Some("sk-test"))
            .generate_faq_answer(&request())
            .await
            .unwrap();
        assert_eq!(faq.confidence, 87);
        assert_eq!(faq.category, "billing");
        assert_eq!(faq.provider, "openai");
        assert_eq!(faq.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_vendor_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = provider(&server, Some("sk-test"))
            .generate_faq_answer(&request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_connection_requires_key_and_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        assert!(provider(&server, Some("sk-test")).test_connection().await);
        assert!(!provider(&server, None).test_connection().await);
    }
}
