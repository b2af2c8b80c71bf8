//! Text-generation collaborator.
//!
//! Decomposition, synthesis and verification all go through the
//! [`TextGenerator`] trait. The core only ever consumes *structured* output:
//! [`generate_structured`] turns any response that does not decode into the
//! requested type into [`LlmError::NonConforming`].

pub mod openai;

pub use openai::OpenAiGenerator;

use crate::error::LlmError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

/// One schema-constrained generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Name of the expected output schema (e.g. "decomposition")
    pub schema: &'static str,
    pub system: String,
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(schema: &'static str, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            schema,
            system: system.into(),
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Raw text completion for a request
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;
}

/// Generate and decode into `T`, honoring cancellation
pub async fn generate_structured<T: DeserializeOwned>(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    cancel: &CancellationToken,
) -> Result<T, LlmError> {
    if cancel.is_cancelled() {
        return Err(LlmError::Cancelled);
    }

    let text = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        result = generator.generate(request) => result?,
    };

    let json = extract_json(&text).ok_or_else(|| {
        LlmError::NonConforming(format!("{} response contains no JSON value", request.schema))
    })?;

    serde_json::from_str(json)
        .map_err(|e| LlmError::NonConforming(format!("{} response: {}", request.schema, e)))
}

/// Locate the JSON value in a completion.
///
/// Strips markdown code fences, then takes the span from the first `{` or
/// `[` to the last matching closer.
pub fn extract_json(text: &str) -> Option<&str> {
    let mut text = text.trim();

    // Strip markdown code blocks (```json ... ``` or ``` ... ```)
    if text.starts_with("```") {
        text = text
            .trim_start_matches("```json")
            .trim_start_matches("```JSON")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
    }

    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        passed: bool,
    }

    struct Canned(Result<String, LlmError>);

    #[async_trait]
    impl TextGenerator for Canned {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, LlmError> {
            self.0.clone()
        }
    }

    struct Hanging;

    #[async_trait]
    impl TextGenerator for Hanging {
        fn model_name(&self) -> &str {
            "hanging"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, LlmError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("verification", "system", "prompt")
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
        assert_eq!(extract_json("Here you go: [1, 2] done"), Some("[1, 2]"));
        assert_eq!(extract_json("Sure! {\"a\": {\"b\": 2}} hope that helps"), Some("{\"a\": {\"b\": 2}}"));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[tokio::test]
    async fn test_structured_success() {
        let generator = Canned(Ok("```json\n{\"passed\": true}\n```".to_string()));
        let verdict: Verdict = generate_structured(&generator, &request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(verdict, Verdict { passed: true });
    }

    #[tokio::test]
    async fn test_non_conforming_response_is_error() {
        let generator = Canned(Ok("{\"verdict\": \"looks fine\"}".to_string()));
        let result: Result<Verdict, _> =
            generate_structured(&generator, &request(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(LlmError::NonConforming(_))));

        let prose = Canned(Ok("I think the report is fine.".to_string()));
        let result: Result<Verdict, _> =
            generate_structured(&prose, &request(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(LlmError::NonConforming(_))));
    }

    #[tokio::test]
    async fn test_service_error_propagates() {
        let generator = Canned(Err(LlmError::RateLimited));
        let result: Result<Verdict, _> =
            generate_structured(&generator, &request(), &CancellationToken::new()).await;
        assert_eq!(result, Err(LlmError::RateLimited));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_generation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result: Result<Verdict, _> = generate_structured(&Hanging, &request(), &cancel).await;
        assert_eq!(result, Err(LlmError::Cancelled));
    }
}
