use super::{is_empty_payload, Params, Provider, RetryPolicy};
use crate::cache::{cache_key, Cache, CacheStore, TtlPolicy};
use crate::error::SourceError;
use crate::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-key locks held while a network fetch for that key is in flight
type InFlight = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Result of a cache-aside, retried provider fetch. Never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Payload(Value),
    /// Transient failures exhausted the retry budget, or the call was cancelled
    Unavailable(String),
    /// Permanent failure; retrying would not help
    Rejected(String),
}

/// Uniform fetch contract over one [`Provider`]: cache first, then the
/// network under the retry policy, then populate the cache.
///
/// Concurrent fetches of the same key are coalesced: one caller goes to the
/// network while the others wait for it and then read the cache. Clones
/// share the in-flight table.
#[derive(Clone)]
pub struct SourceAdapter {
    provider: Arc<dyn Provider>,
    cache: Cache,
    retry: RetryPolicy,
    ttl: TtlPolicy,
    in_flight: InFlight,
}

impl SourceAdapter {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn CacheStore>,
        retry: RetryPolicy,
        ttl: TtlPolicy,
    ) -> Result<Self> {
        let cache = Cache::new(store, provider.namespace())?;
        Ok(Self {
            provider,
            cache,
            retry,
            ttl,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn name(&self) -> &str {
        self.provider.namespace()
    }

    pub async fn fetch(&self, endpoint: &str, params: &Params, cancel: &CancellationToken) -> FetchOutcome {
        if cancel.is_cancelled() {
            return FetchOutcome::Unavailable("cancelled".to_string());
        }

        let key = cache_key(endpoint, params);
        if let Some(cached) = self.cache.get::<Value>(&key).await {
            tracing::debug!("Cache hit: {} {}", self.name(), endpoint);
            return FetchOutcome::Payload(cached);
        }

        let lock = self
            .in_flight
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let outcome = {
            let _guard = tokio::select! {
                _ = cancel.cancelled() => {
                    self.release(&key, &lock);
                    return FetchOutcome::Unavailable("cancelled".to_string());
                }
                guard = lock.lock() => guard,
            };

            // Another caller may have filled the cache while we waited
            match self.cache.get::<Value>(&key).await {
                Some(cached) => {
                    tracing::debug!("Cache hit after wait: {} {}", self.name(), endpoint);
                    FetchOutcome::Payload(cached)
                }
                None => self.fetch_remote(&key, endpoint, params, cancel).await,
            }
        };
        self.release(&key, &lock);
        outcome
    }

    /// Drop the key's lock from the table once no other caller holds it
    fn release(&self, key: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock();
        let ours = in_flight.get(key).is_some_and(|current| Arc::ptr_eq(current, lock));
        // One reference in the table, one held by the caller
        if ours && Arc::strong_count(lock) <= 2 {
            in_flight.remove(key);
        }
    }

    async fn fetch_remote(
        &self,
        key: &str,
        endpoint: &str,
        params: &Params,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let label = format!("{} {}", self.name(), endpoint);
        let result = self
            .retry
            .run(&label, cancel, |_| self.provider.call(endpoint, params))
            .await;

        match result {
            Ok(payload) => {
                if is_empty_payload(&payload) {
                    tracing::debug!("{} returned an empty payload; not caching", label);
                } else {
                    let ttl = self.ttl.ttl_for(self.provider.volatility(endpoint));
                    self.cache.set(key, &payload, ttl).await;
                }
                FetchOutcome::Payload(payload)
            }
            Err(SourceError::Transient(reason)) => {
                FetchOutcome::Unavailable(format!("{} unavailable: {}", label, reason))
            }
            Err(SourceError::Cancelled) => FetchOutcome::Unavailable("cancelled".to_string()),
            Err(SourceError::Permanent(reason)) => {
                tracing::warn!("{} rejected: {}", label, reason);
                FetchOutcome::Rejected(reason)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::params;
    use crate::cache::{MemoryStore, Volatility};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Provider replaying a scripted sequence of responses
    pub(crate) struct ScriptedProvider {
        namespace: String,
        script: Mutex<VecDeque<std::result::Result<Value, SourceError>>>,
        pub calls: AtomicU32,
    }

    impl ScriptedProvider {
        pub(crate) fn new(
            namespace: &str,
            script: Vec<std::result::Result<Value, SourceError>>,
        ) -> Self {
            Self {
                namespace: namespace.to_string(),
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn namespace(&self) -> &str {
            &self.namespace
        }

        fn volatility(&self, endpoint: &str) -> Volatility {
            if endpoint == "QUOTE" {
                Volatility::Fast
            } else {
                Volatility::Slow
            }
        }

        async fn call(&self, _endpoint: &str, _params: &Params) -> std::result::Result<Value, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(SourceError::Permanent("script exhausted".to_string())))
        }
    }

    fn adapter(provider: Arc<ScriptedProvider>, max_retries: u32) -> SourceAdapter {
        SourceAdapter::new(
            provider,
            Arc::new(MemoryStore::new()),
            RetryPolicy::new(Duration::from_millis(1), max_retries),
            TtlPolicy::default(),
        )
        .unwrap()
    }

    fn transient() -> std::result::Result<Value, SourceError> {
        Err(SourceError::Transient("HTTP 503".to_string()))
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(
            "scripted",
            vec![transient(), transient(), Ok(json!({"Symbol": "AAPL"}))],
        ));
        let adapter = adapter(provider.clone(), 2);

        let outcome = adapter
            .fetch("OVERVIEW", &params([("symbol", "AAPL")]), &CancellationToken::new())
            .await;
        assert_eq!(outcome, FetchOutcome::Payload(json!({"Symbol": "AAPL"})));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_unavailable_not_error() {
        let provider = Arc::new(ScriptedProvider::new(
            "scripted",
            vec![transient(), transient(), transient(), Ok(json!({"late": true}))],
        ));
        let adapter = adapter(provider.clone(), 2);

        let outcome = adapter
            .fetch("OVERVIEW", &params([("symbol", "AAPL")]), &CancellationToken::new())
            .await;
        assert!(matches!(outcome, FetchOutcome::Unavailable(_)));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_rejected_immediately() {
        let provider = Arc::new(ScriptedProvider::new(
            "scripted",
            vec![Err(SourceError::Permanent("HTTP 403".to_string())), Ok(json!({}))],
        ));
        let adapter = adapter(provider.clone(), 3);

        let outcome = adapter
            .fetch("OVERVIEW", &params([("symbol", "AAPL")]), &CancellationToken::new())
            .await;
        assert_eq!(outcome, FetchOutcome::Rejected("HTTP 403".to_string()));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_second_fetch_served_from_cache() {
        let provider = Arc::new(ScriptedProvider::new("scripted", vec![Ok(json!({"v": 1}))]));
        let adapter = adapter(provider.clone(), 2);
        let p = params([("symbol", "MSFT")]);
        let cancel = CancellationToken::new();

        let first = adapter.fetch("INCOME_STATEMENT", &p, &cancel).await;
        let second = adapter.fetch("INCOME_STATEMENT", &p, &cancel).await;
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_not_cached() {
        let provider = Arc::new(ScriptedProvider::new(
            "scripted",
            vec![Ok(json!({})), Ok(json!({"v": 2}))],
        ));
        let adapter = adapter(provider.clone(), 0);
        let p = params([("symbol", "TSLA")]);
        let cancel = CancellationToken::new();

        assert_eq!(adapter.fetch("OVERVIEW", &p, &cancel).await, FetchOutcome::Payload(json!({})));
        assert_eq!(
            adapter.fetch("OVERVIEW", &p, &cancel).await,
            FetchOutcome::Payload(json!({"v": 2}))
        );
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_returns_unavailable() {
        let provider = Arc::new(ScriptedProvider::new("scripted", vec![Ok(json!({"v": 1}))]));
        let adapter = adapter(provider.clone(), 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = adapter.fetch("OVERVIEW", &params([("symbol", "AAPL")]), &cancel).await;
        assert_eq!(outcome, FetchOutcome::Unavailable("cancelled".to_string()));
        assert_eq!(provider.calls(), 0);
    }

    /// Provider that takes a while to answer, counting calls
    struct SlowProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Provider for SlowProvider {
        fn namespace(&self) -> &str {
            "slow"
        }

        fn volatility(&self, _endpoint: &str) -> Volatility {
            Volatility::Slow
        }

        async fn call(&self, _endpoint: &str, _params: &Params) -> std::result::Result<Value, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!({"Symbol": "TSLA"}))
        }
    }

    #[tokio::test]
    async fn test_concurrent_identical_fetches_share_one_call() {
        let provider = Arc::new(SlowProvider { calls: AtomicU32::new(0) });
        let adapter = SourceAdapter::new(
            provider.clone(),
            Arc::new(MemoryStore::new()),
            RetryPolicy::new(Duration::from_millis(1), 2),
            TtlPolicy::default(),
        )
        .unwrap();
        let p = params([("symbol", "TSLA")]);
        let cancel = CancellationToken::new();

        let started = std::time::Instant::now();
        let outcomes = futures::future::join_all((0..3).map(|_| adapter.fetch("OVERVIEW", &p, &cancel))).await;

        // Waiters are served from the first call, not three sequential calls
        assert!(started.elapsed() < Duration::from_millis(140));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        for outcome in outcomes {
            assert_eq!(outcome, FetchOutcome::Payload(json!({"Symbol": "TSLA"})));
        }
        assert!(adapter.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_are_not_coalesced() {
        let provider = Arc::new(SlowProvider { calls: AtomicU32::new(0) });
        let adapter = SourceAdapter::new(
            provider.clone(),
            Arc::new(MemoryStore::new()),
            RetryPolicy::new(Duration::from_millis(1), 0),
            TtlPolicy::default(),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        let tsla = params([("symbol", "TSLA")]);
        let aapl = params([("symbol", "AAPL")]);

        futures::future::join(
            adapter.fetch("OVERVIEW", &tsla, &cancel),
            adapter.fetch("OVERVIEW", &aapl, &cancel),
        )
        .await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ttl_follows_endpoint_volatility() {
        let provider = Arc::new(ScriptedProvider::new(
            "scripted",
            vec![Ok(json!({"price": "101.5"})), Ok(json!({"Symbol": "AAPL"}))],
        ));
        let store = Arc::new(MemoryStore::new());
        let ttl = TtlPolicy::new(Duration::from_secs(3600), Duration::from_secs(60));
        let adapter = SourceAdapter::new(
            provider,
            store.clone(),
            RetryPolicy::new(Duration::from_millis(1), 0),
            ttl,
        )
        .unwrap();
        let p = params([("symbol", "AAPL")]);
        let cancel = CancellationToken::new();

        adapter.fetch("QUOTE", &p, &cancel).await;
        adapter.fetch("OVERVIEW", &p, &cancel).await;

        let remaining_ms = |entry: crate::cache::CacheEntry| entry.expires_at - crate::cache::now_millis();
        let quote = store
            .load(&format!("scripted:{}", cache_key("QUOTE", &p)))
            .await
            .unwrap()
            .unwrap();
        let overview = store
            .load(&format!("scripted:{}", cache_key("OVERVIEW", &p)))
            .await
            .unwrap()
            .unwrap();

        let quote_left = remaining_ms(quote);
        let overview_left = remaining_ms(overview);
        assert!(quote_left <= 60_000 && quote_left > 55_000, "quote ttl {}", quote_left);
        assert!(overview_left <= 3_600_000 && overview_left > 3_595_000, "overview ttl {}", overview_left);
    }
}
