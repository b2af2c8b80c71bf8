use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single provider call, classified for the retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Rate limit, 5xx, timeout or a provider "slow down" marker. Retried.
    #[error("transient source failure: {0}")]
    Transient(String),

    /// Auth failure, 4xx other than 429, malformed schema. Never retried.
    #[error("permanent source failure: {0}")]
    Permanent(String),

    #[error("source call cancelled")]
    Cancelled,
}

impl SourceError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            SourceError::Transient(message)
        } else {
            SourceError::Permanent(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return SourceError::from_status(status, &err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            SourceError::Transient(format!("network error: {}", err))
        } else {
            SourceError::Permanent(format!("malformed response: {}", err))
        }
    }
}

/// Failure of the external text-generation service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("text generation request failed: {0}")]
    Request(String),

    #[error("text generation rate limited")]
    RateLimited,

    #[error("text generation API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("non-conforming text generation response: {0}")]
    NonConforming(String),

    #[error("text generation cancelled")]
    Cancelled,
}

/// Main error type for the research core
#[derive(Error, Debug)]
pub enum ResearchError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Cache backend errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    // Collaborator errors
    #[error("Text generation error: {0}")]
    Llm(#[from] LlmError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    // Request errors
    #[error("No researchable sub-tasks could be extracted from question: {0}")]
    NoSubTasks(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(SourceError::from_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(SourceError::from_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(SourceError::from_status(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());

        let not_found = SourceError::from_status(StatusCode::NOT_FOUND, "missing");
        assert!(matches!(not_found, SourceError::Permanent(_)));
        let unauthorized = SourceError::from_status(StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(unauthorized, SourceError::Permanent(_)));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 3), "abc...");
    }
}
