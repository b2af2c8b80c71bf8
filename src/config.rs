use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, layered from defaults, `config/*.toml` and
/// `FINRESEARCH__SECTION__KEY` environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// External data providers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub alpha_vantage_api_key: Option<String>,
    pub alpha_vantage_url: String,
    /// Requests per minute allowed by the Alpha Vantage plan
    pub alpha_vantage_rpm: u32,
    /// SEC EDGAR rejects requests without a contact User-Agent
    pub sec_user_agent: String,
    pub sec_data_url: String,
    pub sec_tickers_url: String,
    pub news_api_key: Option<String>,
    pub news_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            alpha_vantage_api_key: None,
            alpha_vantage_url: "https://www.alphavantage.co".to_string(),
            alpha_vantage_rpm: 5,
            sec_user_agent: "finresearch research-bot admin@example.com".to_string(),
            sec_data_url: "https://data.sec.gov".to_string(),
            sec_tickers_url: "https://www.sec.gov/files/company_tickers.json".to_string(),
            news_api_key: None,
            news_url: "https://api.tavily.com".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Text-generation service (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 2048,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    File,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub directory: PathBuf,
    pub redis_url: String,
    /// TTL for slow-changing data (profiles, statements)
    pub long_ttl_secs: u64,
    /// TTL for fast-changing data (quotes, news)
    pub short_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            directory: PathBuf::from(".cache"),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            long_ttl_secs: 24 * 60 * 60,
            short_ttl_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    /// Retries after the first call
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Whole-run deadline; in-flight calls are cancelled when it passes
    pub deadline_secs: u64,
    /// Plan and run web searches for context when the caller supplies none
    pub web_search: bool,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 300,
            web_search: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "finresearch=info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FINRESEARCH_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (FINRESEARCH__LLM__MODEL, etc.)
            .add_source(
                Environment::with_prefix("FINRESEARCH")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: AppConfig = builder.build()?.try_deserialize()?;
        config.apply_key_fallbacks();
        Ok(config)
    }

    /// Fill missing API keys from the conventional provider variables
    fn apply_key_fallbacks(&mut self) {
        fill_from_env(&mut self.providers.alpha_vantage_api_key, "ALPHA_VANTAGE_API_KEY");
        fill_from_env(&mut self.providers.news_api_key, "TAVILY_API_KEY");
        fill_from_env(&mut self.llm.api_key, "OPENAI_API_KEY");
    }
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CacheConfig {
    pub fn long_ttl(&self) -> Duration {
        Duration::from_secs(self.long_ttl_secs)
    }

    pub fn short_ttl(&self) -> Duration {
        Duration::from_secs(self.short_ttl_secs)
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl ResearchConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    if slot.as_deref().map_or(true, str::is_empty) {
        *slot = std::env::var(var).ok().filter(|v| !v.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.long_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.cache.short_ttl(), Duration::from_secs(300));
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.providers.alpha_vantage_rpm, 5);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[cache]
backend = "file"
directory = "/tmp/finresearch-cache"
short_ttl_secs = 60

[retry]
base_delay_ms = 250
max_retries = 4

[llm]
model = "gpt-4o"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.cache.backend, CacheBackend::File);
        assert_eq!(config.cache.directory, PathBuf::from("/tmp/finresearch-cache"));
        assert_eq!(config.cache.short_ttl_secs, 60);
        // Unset keys keep their defaults
        assert_eq!(config.cache.long_ttl_secs, 86_400);
        assert_eq!(config.retry.base_delay(), Duration::from_millis(250));
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_missing_directory_uses_defaults() {
        let config = AppConfig::load_from("/nonexistent/finresearch/config").unwrap();
        assert_eq!(config.research.deadline_secs, 300);
        assert!(config.research.web_search);
        assert_eq!(config.logging.level, "finresearch=info");
    }
}
