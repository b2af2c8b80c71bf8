use super::TickerLookup;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Well-known company names, checked before any network lookup
const KNOWN_COMPANIES: &[(&str, &str)] = &[
    ("apple", "AAPL"),
    ("microsoft", "MSFT"),
    ("alphabet", "GOOGL"),
    ("google", "GOOGL"),
    ("amazon", "AMZN"),
    ("meta", "META"),
    ("facebook", "META"),
    ("tesla", "TSLA"),
    ("nvidia", "NVDA"),
    ("netflix", "NFLX"),
    ("intel", "INTC"),
    ("amd", "AMD"),
    ("advanced micro devices", "AMD"),
    ("ibm", "IBM"),
    ("oracle", "ORCL"),
    ("salesforce", "CRM"),
    ("adobe", "ADBE"),
    ("berkshire hathaway", "BRK.B"),
    ("jpmorgan", "JPM"),
    ("jp morgan", "JPM"),
    ("walmart", "WMT"),
    ("coca-cola", "KO"),
    ("coca cola", "KO"),
    ("pepsico", "PEP"),
    ("disney", "DIS"),
    ("boeing", "BA"),
    ("exxon", "XOM"),
    ("exxonmobil", "XOM"),
];

const CORPORATE_SUFFIXES: [&str; 8] = [
    " inc", " corp", " corporation", " co", " ltd", " plc", " company", " incorporated",
];

/// Offline name → ticker table
#[derive(Debug, Clone)]
pub struct StaticTickerLookup {
    table: HashMap<String, String>,
}

impl StaticTickerLookup {
    pub fn new() -> Self {
        Self::with_entries(KNOWN_COMPANIES.iter().map(|(n, t)| (n.to_string(), t.to_string())))
    }

    pub fn with_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let table = entries
            .into_iter()
            .map(|(name, ticker)| (normalize(&name), ticker.to_uppercase()))
            .collect();
        Self { table }
    }

    pub fn lookup(&self, company: &str) -> Option<String> {
        let key = normalize(company);
        if let Some(ticker) = self.table.get(&key) {
            return Some(ticker.clone());
        }
        // A bare ticker symbol resolves to itself
        let trimmed = company.trim();
        if looks_like_ticker(trimmed) {
            return Some(trimmed.to_string());
        }
        None
    }
}

impl Default for StaticTickerLookup {
    fn default() -> Self {
        Self::new()
    }
}

/// 1-5 uppercase letters, optionally with a share-class suffix (BRK.B)
pub fn looks_like_ticker(token: &str) -> bool {
    let (base, class) = match token.split_once('.') {
        Some((base, class)) => (base, Some(class)),
        None => (token, None),
    };
    let base_ok = (1..=5).contains(&base.len()) && base.chars().all(|c| c.is_ascii_uppercase());
    let class_ok = class.map_or(true, |c| c.len() == 1 && c.chars().all(|ch| ch.is_ascii_uppercase()));
    base_ok && class_ok
}

fn normalize(name: &str) -> String {
    let mut name = name.trim().to_lowercase().replace([',', '.', '\''], "");
    for suffix in CORPORATE_SUFFIXES {
        if let Some(stripped) = name.strip_suffix(suffix) {
            name = stripped.trim_end().to_string();
        }
    }
    name
}

#[async_trait]
impl TickerLookup for StaticTickerLookup {
    async fn resolve(&self, company: &str, _cancel: &CancellationToken) -> Option<String> {
        self.lookup(company)
    }
}

/// Tries each lookup in order, first hit wins
pub struct ChainLookup {
    lookups: Vec<Arc<dyn TickerLookup>>,
}

impl ChainLookup {
    pub fn new(lookups: Vec<Arc<dyn TickerLookup>>) -> Self {
        Self { lookups }
    }
}

#[async_trait]
impl TickerLookup for ChainLookup {
    async fn resolve(&self, company: &str, cancel: &CancellationToken) -> Option<String> {
        for lookup in &self.lookups {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(ticker) = lookup.resolve(company, cancel).await {
                tracing::debug!("Resolved {} -> {}", company, ticker);
                return Some(ticker);
            }
        }
        tracing::warn!("Could not resolve ticker for {}", company);
        None
    }
}
