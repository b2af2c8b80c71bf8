use crate::api::{CategoryOutcome, CategorySource, CompanyTarget, StubSource};
use crate::models::{AttemptOutcome, DataCategory, SourceAttempt, SourceRecord};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Provenance used when no source in a chain produced even an empty record
pub const NO_SOURCE: &str = "none";

/// Record chosen for one category plus the log of every source tried
#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: SourceRecord,
    pub attempts: Vec<SourceAttempt>,
}

/// Ordered source chains per data category.
///
/// The chain order is data: sources are tried front to back and the first
/// non-empty record wins. Empty payloads and failures both mean "try the
/// next source"; payloads from different sources are never merged.
#[derive(Clone, Default)]
pub struct FallbackResolver {
    chains: BTreeMap<DataCategory, Vec<Arc<dyn CategorySource>>>,
}

impl FallbackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, category: DataCategory, chain: Vec<Arc<dyn CategorySource>>) -> Self {
        self.chains.insert(category, chain);
        self
    }

    /// Market data first, filings second, stub last
    pub fn standard(
        market: Arc<dyn CategorySource>,
        filings: Arc<dyn CategorySource>,
        news: Arc<dyn CategorySource>,
    ) -> Self {
        let stub: Arc<dyn CategorySource> = Arc::new(StubSource);
        let statements = vec![market.clone(), filings.clone(), stub.clone()];

        Self::new()
            .with_chain(DataCategory::Profile, statements.clone())
            .with_chain(DataCategory::FinancialMetrics, statements.clone())
            .with_chain(DataCategory::BalanceSheet, statements)
            .with_chain(DataCategory::StockSeries, vec![market.clone(), stub.clone()])
            .with_chain(DataCategory::News, vec![news, market, stub.clone()])
            .with_chain(DataCategory::Filings, vec![filings, stub])
    }

    pub fn categories(&self) -> Vec<DataCategory> {
        self.chains.keys().copied().collect()
    }

    /// Source names in chain order, for diagnostics
    pub fn chain_names(&self, category: DataCategory) -> Vec<&str> {
        self.chains
            .get(&category)
            .map(|chain| chain.iter().map(|s| s.name()).collect())
            .unwrap_or_default()
    }

    pub async fn resolve(
        &self,
        category: DataCategory,
        target: &CompanyTarget,
        cancel: &CancellationToken,
    ) -> Resolution {
        let mut attempts = Vec::new();
        let mut empty_provenance: Option<String> = None;

        let chain = self.chains.get(&category).map(Vec::as_slice).unwrap_or_default();
        for source in chain.iter().filter(|s| s.supports(category)) {
            if cancel.is_cancelled() {
                attempts.push(SourceAttempt {
                    category,
                    adapter: source.name().to_string(),
                    outcome: AttemptOutcome::Error("cancelled".to_string()),
                });
                break;
            }

            let outcome = match source.fetch_category(category, target, cancel).await {
                CategoryOutcome::Found(data) if data.category() == category && !data.is_empty() => {
                    attempts.push(SourceAttempt {
                        category,
                        adapter: source.name().to_string(),
                        outcome: AttemptOutcome::Success,
                    });
                    return Resolution {
                        record: SourceRecord::new(source.name(), data),
                        attempts,
                    };
                }
                CategoryOutcome::Found(data) if data.category() != category => {
                    AttemptOutcome::Error(format!("returned {} for {}", data.category(), category))
                }
                CategoryOutcome::Found(_) | CategoryOutcome::Empty => {
                    empty_provenance = Some(source.name().to_string());
                    AttemptOutcome::Empty
                }
                CategoryOutcome::Failed(reason) => {
                    tracing::warn!(
                        "{} {} via {} failed, trying next source: {}",
                        target.ticker,
                        category,
                        source.name(),
                        reason
                    );
                    AttemptOutcome::Error(reason)
                }
            };

            attempts.push(SourceAttempt {
                category,
                adapter: source.name().to_string(),
                outcome,
            });
        }

        tracing::debug!("{} {} absent after {} attempt(s)", target.ticker, category, attempts.len());
        let provenance = empty_provenance.unwrap_or_else(|| NO_SOURCE.to_string());
        Resolution {
            record: SourceRecord::absent(category, provenance),
            attempts,
        }
    }
}
