pub mod alpha_vantage;
pub mod news;
pub mod retry;
pub mod sec;
pub mod source;
pub mod stub;
pub mod ticker;

pub use alpha_vantage::{AlphaVantageProvider, AlphaVantageSource};
pub use news::{NewsProvider, NewsSource};
pub use retry::RetryPolicy;
pub use sec::{SecProvider, SecSource};
pub use source::{FetchOutcome, SourceAdapter};
pub use stub::StubSource;
pub use ticker::{ChainLookup, StaticTickerLookup};

use crate::cache::Volatility;
use crate::error::SourceError;
use crate::models::{CategoryData, DataCategory};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Request parameters, kept sorted so cache keys are deterministic
pub type Params = BTreeMap<String, String>;

/// Build [`Params`] from string pairs
pub fn params<const N: usize>(pairs: [(&str, &str); N]) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Raw network call against one external provider.
///
/// Implementations perform exactly one request per `call`; retry and caching
/// are layered on top by [`SourceAdapter`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Cache namespace, unique per provider
    fn namespace(&self) -> &str;

    fn volatility(&self, endpoint: &str) -> Volatility;

    async fn call(&self, endpoint: &str, params: &Params) -> Result<Value, SourceError>;
}

/// Company a category fetch is aimed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyTarget {
    pub ticker: String,
    pub company_name: String,
}

impl CompanyTarget {
    pub fn new(ticker: impl Into<String>, company_name: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into().to_uppercase(),
            company_name: company_name.into(),
        }
    }

    /// Name to search with: company name if known, otherwise the ticker
    pub fn search_name(&self) -> &str {
        if self.company_name.trim().is_empty() {
            &self.ticker
        } else {
            &self.company_name
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CategoryOutcome {
    Found(CategoryData),
    Empty,
    Failed(String),
}

impl CategoryOutcome {
    /// Zero/empty payloads collapse to `Empty`
    pub fn from_data(data: CategoryData) -> Self {
        if data.is_empty() {
            CategoryOutcome::Empty
        } else {
            CategoryOutcome::Found(data)
        }
    }
}

/// One link in a category fallback chain
#[async_trait]
pub trait CategorySource: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, category: DataCategory) -> bool;

    async fn fetch_category(
        &self,
        category: DataCategory,
        target: &CompanyTarget,
        cancel: &CancellationToken,
    ) -> CategoryOutcome;
}

/// Free-form web search, independent of any one company
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, cancel: &CancellationToken) -> CategoryOutcome;
}

/// Company name → ticker resolution
#[async_trait]
pub trait TickerLookup: Send + Sync {
    async fn resolve(&self, company: &str, cancel: &CancellationToken) -> Option<String>;
}

/// Treat JSON null, `{}` and `[]` as an empty payload
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Decode a provider number field; `"None"`, `"-"`, `""` mean absent
pub fn parse_number(raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim();
    match raw {
        "" | "None" | "none" | "-" | "N/A" | "null" => None,
        _ => raw.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

pub fn non_blank(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != "None" && s != "-")
}
