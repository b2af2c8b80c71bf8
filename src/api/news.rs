use super::{
    non_blank, params, CategoryOutcome, CategorySource, CompanyTarget, FetchOutcome, Params,
    Provider, SourceAdapter, WebSearch,
};
use crate::cache::Volatility;
use crate::error::SourceError;
use crate::models::{CategoryData, DataCategory, NewsArticle, NewsData};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "news_search";
const MAX_RESULTS: u32 = 10;

/// Tavily-compatible web news search
#[derive(Clone)]
pub struct NewsProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    topic: &'a str,
    search_depth: &'a str,
    include_answer: bool,
    max_results: u32,
}

impl NewsProvider {
    pub fn new(api_key: Option<String>, base_url: &str, timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Provider for NewsProvider {
    fn namespace(&self) -> &str {
        NAMESPACE
    }

    fn volatility(&self, _endpoint: &str) -> Volatility {
        Volatility::Fast
    }

    async fn call(&self, endpoint: &str, params: &Params) -> Result<Value, SourceError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| SourceError::Permanent("news search API key not configured".to_string()))?;
        let query = params
            .get("query")
            .ok_or_else(|| SourceError::Permanent("news search requires a query".to_string()))?;

        let request = SearchRequest {
            api_key,
            query,
            topic: "news",
            search_depth: "advanced",
            include_answer: true,
            max_results: MAX_RESULTS,
        };

        let response = self
            .client
            .post(format!("{}/{}", self.base_url, endpoint))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(status, &body));
        }

        Ok(response.json().await?)
    }
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct SearchResponse {
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    content: Option<String>,
    published_date: Option<String>,
    score: Option<f64>,
}

pub fn decode_search(payload: &Value) -> Result<NewsData, serde_json::Error> {
    let raw = SearchResponse::deserialize(payload)?;
    let articles = raw
        .results
        .into_iter()
        .filter(|r| !r.title.is_empty())
        .map(|r| {
            if let Some(score) = r.score {
                tracing::trace!("news result {} relevance {:.2}", r.url, score);
            }
            NewsArticle {
                title: r.title,
                url: r.url,
                published: non_blank(r.published_date),
                summary: non_blank(r.content),
                sentiment: None,
            }
        })
        .collect();
    Ok(NewsData {
        articles,
        answer: non_blank(raw.answer),
    })
}

pub fn news_query(target: &CompanyTarget) -> String {
    if target.company_name.trim().is_empty() {
        format!("{} stock financial news", target.ticker)
    } else {
        format!("{} ({}) stock financial news", target.company_name.trim(), target.ticker)
    }
}

/// Primary news link
#[derive(Clone)]
pub struct NewsSource {
    adapter: SourceAdapter,
}

impl NewsSource {
    pub fn new(adapter: SourceAdapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl CategorySource for NewsSource {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn supports(&self, category: DataCategory) -> bool {
        category == DataCategory::News
    }

    async fn fetch_category(
        &self,
        category: DataCategory,
        target: &CompanyTarget,
        cancel: &CancellationToken,
    ) -> CategoryOutcome {
        if category != DataCategory::News {
            return CategoryOutcome::Failed(format!("{} not offered", category));
        }
        self.search(&news_query(target), cancel).await
    }
}

#[async_trait]
impl WebSearch for NewsSource {
    async fn search(&self, query: &str, cancel: &CancellationToken) -> CategoryOutcome {
        match self.adapter.fetch("search", &params([("query", query)]), cancel).await {
            FetchOutcome::Payload(payload) => match decode_search(&payload) {
                Ok(news) => CategoryOutcome::from_data(CategoryData::News(news)),
                Err(e) => CategoryOutcome::Failed(format!("malformed search payload: {}", e)),
            },
            FetchOutcome::Unavailable(reason) | FetchOutcome::Rejected(reason) => {
                CategoryOutcome::Failed(reason)
            }
        }
    }
}
