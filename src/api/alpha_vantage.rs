use super::{
    non_blank, params, parse_number, CategoryOutcome, CategorySource, CompanyTarget, FetchOutcome,
    Params, Provider, SourceAdapter, TickerLookup,
};
use crate::cache::Volatility;
use crate::error::{truncate, SourceError};
use crate::models::{
    BalanceSheet, BalanceSheetPeriod, CategoryData, CompanyProfile, DataCategory,
    FinancialMetrics, FinancialPeriod, NewsArticle, NewsData, PriceBar, StockSeries,
};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "alpha_vantage";
const MAX_PERIODS: usize = 8;
const NEWS_LIMIT: &str = "20";

// Type alias for the rate limiter to simplify signatures
type AlphaVantageRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Alpha Vantage `/query` client, one request per call.
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct AlphaVantageProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<AlphaVantageRateLimiter>,
}

impl AlphaVantageProvider {
    pub fn new(
        api_key: Option<String>,
        base_url: &str,
        requests_per_minute: u32,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        if api_key.is_none() {
            tracing::warn!("Alpha Vantage API key not set; the source will reject every call");
        }

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            rate_limiter,
        })
    }
}

/// Historical data changes slowly; everything else gets the short TTL
pub fn endpoint_volatility(function: &str) -> Volatility {
    const SLOW: [&str; 9] = [
        "DAILY", "WEEKLY", "MONTHLY", "EARNINGS", "OVERVIEW", "INCOME_STATEMENT",
        "BALANCE_SHEET", "CASH_FLOW", "SYMBOL_SEARCH",
    ];
    let function = function.to_uppercase();
    if SLOW.iter().any(|marker| function.contains(marker)) {
        Volatility::Slow
    } else {
        Volatility::Fast
    }
}

/// Wording Alpha Vantage uses in `Information` when a request is throttled
const RATE_LIMIT_WORDING: &[&str] = &["rate limit", "call frequency", "requests per", "api call volume"];

/// Alpha Vantage reports throttling and bad requests with HTTP 200.
///
/// `Note` is always throttling. `Information` is throttling only when it
/// says so; otherwise it is a refusal such as a premium-only endpoint or an
/// invalid key, which retrying will not fix.
fn check_payload_markers(payload: &Value) -> Result<(), SourceError> {
    if let Some(note) = payload.get("Note") {
        return Err(SourceError::Transient(format!(
            "rate limited: {}",
            truncate(&note.to_string(), 200)
        )));
    }
    if let Some(info) = payload.get("Information") {
        let text = info.to_string();
        let lowered = text.to_lowercase();
        if RATE_LIMIT_WORDING.iter().any(|w| lowered.contains(w)) {
            return Err(SourceError::Transient(format!("rate limited: {}", truncate(&text, 200))));
        }
        return Err(SourceError::Permanent(truncate(&text, 200)));
    }
    if let Some(message) = payload.get("Error Message") {
        return Err(SourceError::Permanent(truncate(&message.to_string(), 200)));
    }
    Ok(())
}

#[async_trait]
impl Provider for AlphaVantageProvider {
    fn namespace(&self) -> &str {
        NAMESPACE
    }

    fn volatility(&self, endpoint: &str) -> Volatility {
        endpoint_volatility(endpoint)
    }

    async fn call(&self, endpoint: &str, params: &Params) -> Result<Value, SourceError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| SourceError::Permanent("Alpha Vantage API key not configured".to_string()))?;

        // Wait for rate limiter
        self.rate_limiter.until_ready().await;

        tracing::debug!("Alpha Vantage request: {} {:?}", endpoint, params);

        let response = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[("function", endpoint), ("apikey", api_key)])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(status, &body));
        }

        let payload: Value = response.json().await?;
        check_payload_markers(&payload)?;
        Ok(payload)
    }
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct OverviewPayload {
    #[serde(rename = "Symbol")]
    symbol: Option<String>,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "CIK")]
    cik: Option<String>,
    #[serde(rename = "Exchange")]
    exchange: Option<String>,
    #[serde(rename = "Sector")]
    sector: Option<String>,
    #[serde(rename = "Industry")]
    industry: Option<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
    #[serde(rename = "MarketCapitalization")]
    market_cap: Option<String>,
    #[serde(rename = "PERatio")]
    pe_ratio: Option<String>,
    #[serde(rename = "EPS")]
    eps: Option<String>,
    #[serde(rename = "ProfitMargin")]
    profit_margin: Option<String>,
    #[serde(rename = "DividendYield")]
    dividend_yield: Option<String>,
    #[serde(rename = "Beta")]
    beta: Option<String>,
    #[serde(rename = "52WeekHigh")]
    week_52_high: Option<String>,
    #[serde(rename = "52WeekLow")]
    week_52_low: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementPayload<T> {
    #[serde(default = "Vec::new")]
    quarterly_reports: Vec<T>,
    #[serde(default = "Vec::new")]
    annual_reports: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomeReport {
    #[serde(default)]
    fiscal_date_ending: String,
    total_revenue: Option<String>,
    gross_profit: Option<String>,
    operating_income: Option<String>,
    net_income: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceReport {
    #[serde(default)]
    fiscal_date_ending: String,
    total_assets: Option<String>,
    total_liabilities: Option<String>,
    total_shareholder_equity: Option<String>,
    cash_and_cash_equivalents_at_carrying_value: Option<String>,
    long_term_debt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailySeriesPayload {
    #[serde(rename = "Time Series (Daily)", default)]
    series: BTreeMap<String, DailyBar>,
}

#[derive(Debug, Deserialize)]
struct DailyBar {
    #[serde(rename = "1. open")]
    open: Option<String>,
    #[serde(rename = "2. high")]
    high: Option<String>,
    #[serde(rename = "3. low")]
    low: Option<String>,
    #[serde(rename = "4. close")]
    close: Option<String>,
    #[serde(rename = "5. volume")]
    volume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsPayload {
    #[serde(default)]
    feed: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    time_published: Option<String>,
    summary: Option<String>,
    overall_sentiment_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SymbolSearchPayload {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SymbolMatch>,
}

#[derive(Debug, Deserialize)]
struct SymbolMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "4. region")]
    region: Option<String>,
}

// ============== Decoders ==============

pub fn decode_overview(payload: &Value) -> Result<CompanyProfile, serde_json::Error> {
    let raw = OverviewPayload::deserialize(payload)?;
    Ok(CompanyProfile {
        name: non_blank(raw.name),
        ticker: non_blank(raw.symbol),
        cik: non_blank(raw.cik),
        exchange: non_blank(raw.exchange),
        sector: non_blank(raw.sector),
        industry: non_blank(raw.industry),
        description: non_blank(raw.description),
        market_cap: parse_number(raw.market_cap.as_deref()),
        pe_ratio: parse_number(raw.pe_ratio.as_deref()),
        eps: parse_number(raw.eps.as_deref()),
        profit_margin: parse_number(raw.profit_margin.as_deref()),
        dividend_yield: parse_number(raw.dividend_yield.as_deref()),
        beta: parse_number(raw.beta.as_deref()),
        fifty_two_week_high: parse_number(raw.week_52_high.as_deref()),
        fifty_two_week_low: parse_number(raw.week_52_low.as_deref()),
    })
}

/// Quarterly reports when present, annual otherwise; newest first
fn pick_reports<T>(payload: StatementPayload<T>) -> Vec<T> {
    if payload.quarterly_reports.is_empty() {
        payload.annual_reports
    } else {
        payload.quarterly_reports
    }
}

pub fn decode_income_statement(payload: &Value) -> Result<FinancialMetrics, serde_json::Error> {
    let raw = StatementPayload::<IncomeReport>::deserialize(payload)?;
    let mut periods: Vec<FinancialPeriod> = pick_reports(raw)
        .into_iter()
        .map(|r| FinancialPeriod {
            fiscal_date: r.fiscal_date_ending,
            revenue: parse_number(r.total_revenue.as_deref()),
            gross_profit: parse_number(r.gross_profit.as_deref()),
            operating_income: parse_number(r.operating_income.as_deref()),
            net_income: parse_number(r.net_income.as_deref()),
            eps: None,
        })
        .collect();
    periods.sort_by(|a, b| b.fiscal_date.cmp(&a.fiscal_date));
    periods.truncate(MAX_PERIODS);
    Ok(FinancialMetrics { periods })
}

pub fn decode_balance_sheet(payload: &Value) -> Result<BalanceSheet, serde_json::Error> {
    let raw = StatementPayload::<BalanceReport>::deserialize(payload)?;
    let mut periods: Vec<BalanceSheetPeriod> = pick_reports(raw)
        .into_iter()
        .map(|r| BalanceSheetPeriod {
            fiscal_date: r.fiscal_date_ending,
            total_assets: parse_number(r.total_assets.as_deref()),
            total_liabilities: parse_number(r.total_liabilities.as_deref()),
            shareholder_equity: parse_number(r.total_shareholder_equity.as_deref()),
            cash: parse_number(r.cash_and_cash_equivalents_at_carrying_value.as_deref()),
            long_term_debt: parse_number(r.long_term_debt.as_deref()),
        })
        .collect();
    periods.sort_by(|a, b| b.fiscal_date.cmp(&a.fiscal_date));
    periods.truncate(MAX_PERIODS);
    Ok(BalanceSheet { periods })
}

pub fn decode_daily_series(payload: &Value) -> Result<StockSeries, serde_json::Error> {
    let raw = DailySeriesPayload::deserialize(payload)?;
    // BTreeMap iterates ISO dates ascending
    let bars = raw
        .series
        .into_iter()
        .rev()
        .filter_map(|(date, bar)| {
            let close = parse_number(bar.close.as_deref())?;
            Some(PriceBar {
                date,
                open: parse_number(bar.open.as_deref()).unwrap_or(close),
                high: parse_number(bar.high.as_deref()).unwrap_or(close),
                low: parse_number(bar.low.as_deref()).unwrap_or(close),
                close,
                volume: parse_number(bar.volume.as_deref()).unwrap_or(0.0),
            })
        })
        .collect();
    Ok(StockSeries { bars })
}

pub fn decode_news(payload: &Value) -> Result<NewsData, serde_json::Error> {
    let raw = NewsPayload::deserialize(payload)?;
    let articles = raw
        .feed
        .into_iter()
        .filter(|item| !item.title.is_empty())
        .map(|item| NewsArticle {
            title: item.title,
            url: item.url,
            published: item.time_published,
            summary: non_blank(item.summary),
            sentiment: item.overall_sentiment_score,
        })
        .collect();
    Ok(NewsData {
        articles,
        answer: None,
    })
}

/// Best symbol match, preferring US listings
pub fn decode_symbol_search(payload: &Value) -> Option<String> {
    let raw = SymbolSearchPayload::deserialize(payload).ok()?;
    let us = raw
        .best_matches
        .iter()
        .find(|m| m.region.as_deref() == Some("United States"));
    us.or_else(|| raw.best_matches.first())
        .map(|m| m.symbol.trim().to_uppercase())
        .filter(|s| !s.is_empty())
}

// ============== Category Source ==============

/// Primary structured-data link in every fallback chain except filings
#[derive(Clone)]
pub struct AlphaVantageSource {
    adapter: SourceAdapter,
}

impl AlphaVantageSource {
    pub fn new(adapter: SourceAdapter) -> Self {
        Self { adapter }
    }

    fn request_for(category: DataCategory, ticker: &str) -> Option<(&'static str, Params)> {
        let request = match category {
            DataCategory::Profile => ("OVERVIEW", params([("symbol", ticker)])),
            DataCategory::FinancialMetrics => ("INCOME_STATEMENT", params([("symbol", ticker)])),
            DataCategory::BalanceSheet => ("BALANCE_SHEET", params([("symbol", ticker)])),
            DataCategory::StockSeries => (
                "TIME_SERIES_DAILY",
                params([("symbol", ticker), ("outputsize", "compact")]),
            ),
            DataCategory::News => (
                "NEWS_SENTIMENT",
                params([("tickers", ticker), ("limit", NEWS_LIMIT), ("sort", "LATEST")]),
            ),
            DataCategory::Filings => return None,
        };
        Some(request)
    }
}

fn decode(category: DataCategory, payload: &Value) -> Result<CategoryData, serde_json::Error> {
    Ok(match category {
        DataCategory::Profile => CategoryData::Profile(decode_overview(payload)?),
        DataCategory::FinancialMetrics => {
            CategoryData::FinancialMetrics(decode_income_statement(payload)?)
        }
        DataCategory::BalanceSheet => CategoryData::BalanceSheet(decode_balance_sheet(payload)?),
        DataCategory::StockSeries => CategoryData::StockSeries(decode_daily_series(payload)?),
        DataCategory::News => CategoryData::News(decode_news(payload)?),
        DataCategory::Filings => CategoryData::empty(DataCategory::Filings),
    })
}

#[async_trait]
impl CategorySource for AlphaVantageSource {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn supports(&self, category: DataCategory) -> bool {
        category != DataCategory::Filings
    }

    async fn fetch_category(
        &self,
        category: DataCategory,
        target: &CompanyTarget,
        cancel: &CancellationToken,
    ) -> CategoryOutcome {
        if target.ticker.is_empty() {
            return CategoryOutcome::Failed("no ticker".to_string());
        }
        let Some((function, params)) = Self::request_for(category, &target.ticker) else {
            return CategoryOutcome::Failed(format!("{} not offered", category));
        };

        match self.adapter.fetch(function, &params, cancel).await {
            FetchOutcome::Payload(payload) => match decode(category, &payload) {
                Ok(data) => CategoryOutcome::from_data(data),
                Err(e) => CategoryOutcome::Failed(format!("malformed {} payload: {}", function, e)),
            },
            FetchOutcome::Unavailable(reason) | FetchOutcome::Rejected(reason) => {
                CategoryOutcome::Failed(reason)
            }
        }
    }
}

#[async_trait]
impl TickerLookup for AlphaVantageSource {
    async fn resolve(&self, company: &str, cancel: &CancellationToken) -> Option<String> {
        let company = company.trim();
        if company.is_empty() {
            return None;
        }
        match self
            .adapter
            .fetch("SYMBOL_SEARCH", &params([("keywords", company)]), cancel)
            .await
        {
            FetchOutcome::Payload(payload) => decode_symbol_search(&payload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RetryPolicy;
    use crate::cache::{MemoryStore, TtlPolicy};
    use mockito::Matcher;
    use serde_json::json;

    fn provider(url: &str) -> AlphaVantageProvider {
        AlphaVantageProvider::new(Some("demo".to_string()), url, 600, Duration::from_secs(5)).unwrap()
    }

    fn source(url: &str, max_retries: u32) -> AlphaVantageSource {
        let adapter = SourceAdapter::new(
            Arc::new(provider(url)),
            Arc::new(MemoryStore::new()),
            RetryPolicy::new(Duration::from_millis(1), max_retries),
            TtlPolicy::default(),
        )
        .unwrap();
        AlphaVantageSource::new(adapter)
    }

    #[test]
    fn test_endpoint_volatility() {
        assert_eq!(endpoint_volatility("OVERVIEW"), Volatility::Slow);
        assert_eq!(endpoint_volatility("TIME_SERIES_DAILY"), Volatility::Slow);
        assert_eq!(endpoint_volatility("EARNINGS"), Volatility::Slow);
        assert_eq!(endpoint_volatility("GLOBAL_QUOTE"), Volatility::Fast);
        assert_eq!(endpoint_volatility("TIME_SERIES_INTRADAY"), Volatility::Fast);
        assert_eq!(endpoint_volatility("NEWS_SENTIMENT"), Volatility::Fast);
    }

    #[test]
    fn test_payload_markers() {
        assert!(matches!(
            check_payload_markers(&json!({"Note": "Thank you for using Alpha Vantage!"})),
            Err(SourceError::Transient(_))
        ));
        assert!(matches!(
            check_payload_markers(&json!({"Information": "rate limit"})),
            Err(SourceError::Transient(_))
        ));
        assert!(matches!(
            check_payload_markers(&json!({
                "Information": "We have detected your API key and our standard API rate limit is 25 requests per day."
            })),
            Err(SourceError::Transient(_))
        ));
        assert!(matches!(
            check_payload_markers(&json!({
                "Information": "Please consider spreading out your free API requests more sparingly (1 request per second). Call frequency exceeded."
            })),
            Err(SourceError::Transient(_))
        ));
        assert!(matches!(
            check_payload_markers(&json!({
                "Information": "Thank you for using Alpha Vantage! This is a premium endpoint. You may subscribe to any of the premium plans to instantly unlock all premium endpoints."
            })),
            Err(SourceError::Permanent(_))
        ));
        assert!(matches!(
            check_payload_markers(&json!({"Information": "The **demo** API key is for demo purposes only."})),
            Err(SourceError::Permanent(_))
        ));
        assert!(matches!(
            check_payload_markers(&json!({"Error Message": "Invalid API call"})),
            Err(SourceError::Permanent(_))
        ));
        assert!(check_payload_markers(&json!({"Symbol": "IBM"})).is_ok());
    }

    #[test]
    fn test_decode_overview_handles_none_strings() {
        let profile = decode_overview(&json!({
            "Symbol": "AAPL",
            "Name": "Apple Inc",
            "Sector": "TECHNOLOGY",
            "MarketCapitalization": "3400000000000",
            "PERatio": "None",
            "DividendYield": "0.0044",
            "52WeekHigh": "237.23",
            "52WeekLow": "-"
        }))
        .unwrap();
        assert_eq!(profile.name.as_deref(), Some("Apple Inc"));
        assert_eq!(profile.market_cap, Some(3.4e12));
        assert_eq!(profile.pe_ratio, None);
        assert_eq!(profile.fifty_two_week_high, Some(237.23));
        assert_eq!(profile.fifty_two_week_low, None);
        assert!(profile.industry.is_none());
    }

    #[test]
    fn test_decode_income_statement_newest_first() {
        let metrics = decode_income_statement(&json!({
            "symbol": "MSFT",
            "quarterlyReports": [
                {"fiscalDateEnding": "2024-03-31", "totalRevenue": "61858000000", "netIncome": "21939000000"},
                {"fiscalDateEnding": "2024-06-30", "totalRevenue": "64727000000", "netIncome": "22036000000"}
            ],
            "annualReports": [
                {"fiscalDateEnding": "2023-06-30", "totalRevenue": "211915000000"}
            ]
        }))
        .unwrap();
        assert_eq!(metrics.periods.len(), 2);
        assert_eq!(metrics.periods[0].fiscal_date, "2024-06-30");
        assert_eq!(metrics.periods[0].revenue, Some(64_727_000_000.0));
        assert_eq!(metrics.periods[1].net_income, Some(21_939_000_000.0));
    }

    #[test]
    fn test_decode_income_statement_falls_back_to_annual() {
        let metrics = decode_income_statement(&json!({
            "annualReports": [{"fiscalDateEnding": "2023-12-31", "totalRevenue": "96773000000"}]
        }))
        .unwrap();
        assert_eq!(metrics.periods.len(), 1);
        assert_eq!(metrics.periods[0].revenue, Some(96_773_000_000.0));
    }

    #[test]
    fn test_decode_daily_series() {
        let series = decode_daily_series(&json!({
            "Meta Data": {"2. Symbol": "IBM"},
            "Time Series (Daily)": {
                "2024-01-02": {"1. open": "160.0", "2. high": "162.0", "3. low": "159.0", "4. close": "161.5", "5. volume": "100"},
                "2024-01-03": {"1. open": "161.5", "2. high": "163.0", "3. low": "160.0", "4. close": "162.0", "5. volume": "200"},
                "2024-01-04": {"1. open": "x", "4. close": "None"}
            }
        }))
        .unwrap();
        assert_eq!(series.bars.len(), 2);
        assert_eq!(series.bars[0].date, "2024-01-03");
        assert_eq!(series.bars[0].volume, 200.0);
    }

    #[test]
    fn test_decode_symbol_search_prefers_us() {
        let payload = json!({"bestMatches": [
            {"1. symbol": "TSCO.LON", "2. name": "Tesco PLC", "4. region": "United Kingdom"},
            {"1. symbol": "TSLA", "2. name": "Tesla Inc", "4. region": "United States"}
        ]});
        assert_eq!(decode_symbol_search(&payload).as_deref(), Some("TSLA"));
        assert_eq!(decode_symbol_search(&json!({"bestMatches": []})), None);
    }

    #[tokio::test]
    async fn test_fetch_profile_from_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("function".into(), "OVERVIEW".into()),
                Matcher::UrlEncoded("symbol".into(), "AAPL".into()),
                Matcher::UrlEncoded("apikey".into(), "demo".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Symbol": "AAPL", "Name": "Apple Inc", "Sector": "TECHNOLOGY"}"#)
            .expect(1)
            .create_async()
            .await;

        let source = source(&server.url(), 2);
        let target = CompanyTarget::new("AAPL", "Apple");
        let cancel = CancellationToken::new();

        let first = source.fetch_category(DataCategory::Profile, &target, &cancel).await;
        // Second call is served from the cache
        let second = source.fetch_category(DataCategory::Profile, &target, &cancel).await;

        mock.assert_async().await;
        assert_eq!(first, second);
        match first {
            CategoryOutcome::Found(CategoryData::Profile(profile)) => {
                assert_eq!(profile.name.as_deref(), Some("Apple Inc"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body("not found")
            .expect(1)
            .create_async()
            .await;

        let source = source(&server.url(), 3);
        let outcome = source
            .fetch_category(DataCategory::Profile, &CompanyTarget::new("AAPL", ""), &CancellationToken::new())
            .await;

        mock.assert_async().await;
        assert!(matches!(outcome, CategoryOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_server_error_retried_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let source = source(&server.url(), 2);
        let outcome = source
            .fetch_category(DataCategory::FinancialMetrics, &CompanyTarget::new("MSFT", ""), &CancellationToken::new())
            .await;

        mock.assert_async().await;
        assert!(matches!(outcome, CategoryOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_empty_overview_is_empty_outcome() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let source = source(&server.url(), 0);
        let outcome = source
            .fetch_category(DataCategory::Profile, &CompanyTarget::new("ZZZZ", ""), &CancellationToken::new())
            .await;
        assert_eq!(outcome, CategoryOutcome::Empty);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_permanent() {
        let provider =
            AlphaVantageProvider::new(None, "http://127.0.0.1:9", 60, Duration::from_secs(1)).unwrap();
        let result = provider.call("OVERVIEW", &params([("symbol", "AAPL")])).await;
        assert!(matches!(result, Err(SourceError::Permanent(_))));
    }

    #[tokio::test]
    #[ignore] // Requires API key and network
    async fn test_live_overview() {
        let key = std::env::var("ALPHA_VANTAGE_API_KEY").expect("ALPHA_VANTAGE_API_KEY not set");
        let provider =
            AlphaVantageProvider::new(Some(key), "https://www.alphavantage.co", 5, Duration::from_secs(30)).unwrap();
        let payload = provider.call("OVERVIEW", &params([("symbol", "IBM")])).await.unwrap();
        let profile = decode_overview(&payload).unwrap();
        assert_eq!(profile.ticker.as_deref(), Some("IBM"));
    }
}
