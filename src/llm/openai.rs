/// OpenAI-compatible chat completions client
///
/// Single attempt per call. The callers own the fallback behavior, so rate
/// limits and API errors are surfaced as typed [`LlmError`]s instead of retried.

use super::{GenerationRequest, TextGenerator};
use crate::config::LlmConfig;
use crate::error::{truncate, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: Option<String>,
}

pub struct OpenAiGenerator {
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        Ok(Self {
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Request("no API key configured".to_string()))?;

        let body = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            response_format: ResponseFormat { kind: "json_object" },
        };

        tracing::debug!("Requesting {} completion from {}", request.schema, self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimited);
            }
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::NonConforming(format!("JSON decode error: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| LlmError::NonConforming("completion has no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn config(base_url: String, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            api_key: api_key.map(str::to_string),
            base_url,
            ..Default::default()
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("verification", "Respond with JSON.", "Check this report.")
    }

    #[tokio::test]
    async fn test_generate_returns_message_content() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4o-mini",
                "response_format": {"type": "json_object"}
            })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"{\"passed\":true,\"notes\":\"ok\"}"}}]}"#)
            .create_async()
            .await;

        let generator = OpenAiGenerator::new(&config(server.url(), Some("test-key"))).unwrap();
        let text = generator.generate(&request()).await.unwrap();

        assert_eq!(text, r#"{"passed":true,"notes":"ok"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_and_api_errors() {
        let mut server = Server::new_async().await;
        let limited = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .expect(1)
            .create_async()
            .await;

        let generator = OpenAiGenerator::new(&config(server.url(), Some("test-key"))).unwrap();
        assert_eq!(generator.generate(&request()).await, Err(LlmError::RateLimited));
        limited.assert_async().await;
        limited.remove_async().await;

        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("invalid key")
            .create_async()
            .await;
        assert_eq!(
            generator.generate(&request()).await,
            Err(LlmError::Api {
                status: 401,
                body: "invalid key".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_empty_choices_is_non_conforming() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let generator = OpenAiGenerator::new(&config(server.url(), Some("test-key"))).unwrap();
        assert!(matches!(
            generator.generate(&request()).await,
            Err(LlmError::NonConforming(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_request() {
        let generator = OpenAiGenerator::new(&config("http://127.0.0.1:9".to_string(), None)).unwrap();
        assert!(matches!(
            generator.generate(&request()).await,
            Err(LlmError::Request(_))
        ));
    }

    #[tokio::test]
    #[ignore] // Requires API key and network
    async fn test_live_completion() {
        dotenvy::dotenv().ok();
        let key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let generator = OpenAiGenerator::new(&LlmConfig {
            api_key: Some(key),
            ..Default::default()
        })
        .unwrap();

        let request = GenerationRequest::new(
            "verification",
            "Respond with JSON only.",
            r#"Return {"passed": true, "notes": "ping"}"#,
        );
        let text = generator.generate(&request).await.unwrap();
        assert!(text.contains("passed"));
    }
}
