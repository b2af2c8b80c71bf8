//! Dependency wiring.
//!
//! Stores, providers, source adapters, the text generator and the pipeline
//! are constructed once here and passed down explicitly.

use crate::api::{
    AlphaVantageProvider, AlphaVantageSource, ChainLookup, NewsProvider, NewsSource, RetryPolicy,
    SecProvider, SecSource, SourceAdapter, StaticTickerLookup, TickerLookup,
};
use crate::cache::{CacheStore, FileStore, MemoryStore, RedisStore, TtlPolicy};
use crate::config::{AppConfig, CacheBackend, CacheConfig};
use crate::llm::{OpenAiGenerator, TextGenerator};
use crate::research::{FallbackResolver, ResearchPipeline, WebResearcher};
use crate::Result;
use std::sync::Arc;

pub struct App {
    pub config: AppConfig,
    pub store: Arc<dyn CacheStore>,
    pub pipeline: ResearchPipeline,
}

impl App {
    pub async fn build(config: AppConfig) -> Result<Self> {
        let store = build_store(&config.cache).await?;
        let generator: Arc<dyn TextGenerator> = Arc::new(OpenAiGenerator::new(&config.llm)?);
        let pipeline = build_pipeline(&config, store.clone(), generator)?;

        Ok(Self {
            config,
            store,
            pipeline,
        })
    }
}

/// Open the configured cache backend.
///
/// An unreachable Redis degrades to the in-memory store: cache failures
/// never stop a run.
pub async fn build_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match config.backend {
        CacheBackend::Memory => Arc::new(MemoryStore::new()),
        CacheBackend::File => Arc::new(FileStore::new(&config.directory).await?),
        CacheBackend::Redis => match RedisStore::new(&config.redis_url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!("Failed to connect to Redis ({}), continuing with in-memory cache", e);
                Arc::new(MemoryStore::new())
            }
        },
    };
    tracing::info!("💾 Cache backend: {}", store.backend());
    Ok(store)
}

/// Build the pipeline around any text generator
pub fn build_pipeline(
    config: &AppConfig,
    store: Arc<dyn CacheStore>,
    generator: Arc<dyn TextGenerator>,
) -> Result<ResearchPipeline> {
    let providers = &config.providers;
    let timeout = providers.request_timeout();
    let retry = RetryPolicy::new(config.retry.base_delay(), config.retry.max_retries);
    let ttl = TtlPolicy::new(config.cache.long_ttl(), config.cache.short_ttl());

    let alpha_vantage = Arc::new(AlphaVantageProvider::new(
        providers.alpha_vantage_api_key.clone(),
        &providers.alpha_vantage_url,
        providers.alpha_vantage_rpm,
        timeout,
    )?);
    let sec = Arc::new(SecProvider::new(
        &providers.sec_user_agent,
        &providers.sec_data_url,
        &providers.sec_tickers_url,
        timeout,
    )?);
    let news = Arc::new(NewsProvider::new(
        providers.news_api_key.clone(),
        &providers.news_url,
        timeout,
    )?);

    let market = Arc::new(AlphaVantageSource::new(SourceAdapter::new(
        alpha_vantage,
        store.clone(),
        retry,
        ttl,
    )?));
    let filings = Arc::new(SecSource::new(SourceAdapter::new(
        sec,
        store.clone(),
        retry,
        ttl,
    )?));
    let news = Arc::new(NewsSource::new(SourceAdapter::new(news, store, retry, ttl)?));

    let resolver = FallbackResolver::standard(market.clone(), filings.clone(), news.clone());
    let lookups: Vec<Arc<dyn TickerLookup>> = vec![Arc::new(StaticTickerLookup::new()), market, filings];
    let lookup: Arc<dyn TickerLookup> = Arc::new(ChainLookup::new(lookups));

    tracing::info!("🤖 Text generation model: {}", generator.model_name());
    let pipeline = ResearchPipeline::from_parts(generator.clone(), Arc::new(resolver), lookup);
    if !config.research.web_search {
        tracing::info!("Web search disabled");
        return Ok(pipeline);
    }
    Ok(pipeline.with_web_research(WebResearcher::new(generator, news)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_memory_app() {
        let app = App::build(AppConfig::default()).await.unwrap();
        assert_eq!(app.store.backend(), "memory");
    }

    #[tokio::test]
    async fn test_build_file_store() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            backend: CacheBackend::File,
            directory: dir.path().join("cache"),
            ..Default::default()
        };
        let store = build_store(&config).await.unwrap();
        assert_eq!(store.backend(), "file");
        assert!(dir.path().join("cache").is_dir());
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back_to_memory() {
        let config = CacheConfig {
            backend: CacheBackend::Redis,
            redis_url: "redis://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let store = build_store(&config).await.unwrap();
        assert_eq!(store.backend(), "memory");
    }
}
