//! Typed per-category records decoded at the provider boundary.
//!
//! Every numeric field a provider may omit (or report as `"None"`) is an
//! `Option`, so absence is explicit all the way to the report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Class of financial data fetched through a fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Profile,
    FinancialMetrics,
    BalanceSheet,
    StockSeries,
    News,
    Filings,
}

impl DataCategory {
    pub const ALL: [DataCategory; 6] = [
        DataCategory::Profile,
        DataCategory::FinancialMetrics,
        DataCategory::BalanceSheet,
        DataCategory::StockSeries,
        DataCategory::News,
        DataCategory::Filings,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DataCategory::Profile => "company profile",
            DataCategory::FinancialMetrics => "financial metrics",
            DataCategory::BalanceSheet => "balance sheet",
            DataCategory::StockSeries => "stock series",
            DataCategory::News => "news",
            DataCategory::Filings => "filings",
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub cik: Option<String>,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub eps: Option<f64>,
    pub profit_margin: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub beta: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
}

impl CompanyProfile {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.sector.is_none()
            && self.industry.is_none()
            && self.description.is_none()
            && self.market_cap.is_none()
    }
}

/// One reporting period of income-statement data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialPeriod {
    pub fiscal_date: String,
    pub revenue: Option<f64>,
    pub gross_profit: Option<f64>,
    pub operating_income: Option<f64>,
    pub net_income: Option<f64>,
    pub eps: Option<f64>,
}

/// Income-statement periods, newest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialMetrics {
    pub periods: Vec<FinancialPeriod>,
}

impl FinancialMetrics {
    pub fn latest(&self) -> Option<&FinancialPeriod> {
        self.periods.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheetPeriod {
    pub fiscal_date: String,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub shareholder_equity: Option<f64>,
    pub cash: Option<f64>,
    pub long_term_debt: Option<f64>,
}

/// Balance-sheet periods, newest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub periods: Vec<BalanceSheetPeriod>,
}

impl BalanceSheet {
    pub fn latest(&self) -> Option<&BalanceSheetPeriod> {
        self.periods.first()
    }
}

/// Daily OHLCV bar
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Daily bars, newest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockSeries {
    pub bars: Vec<PriceBar>,
}

impl StockSeries {
    /// Closing prices oldest first, the order indicator functions expect
    pub fn closes_chronological(&self) -> Vec<f64> {
        self.bars.iter().rev().map(|bar| bar.close).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub url: String,
    pub published: Option<String>,
    pub summary: Option<String>,
    pub sentiment: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsData {
    pub articles: Vec<NewsArticle>,
    /// Short answer produced by the search service, when it offers one
    pub answer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filing {
    pub form: String,
    pub filed: String,
    pub accession: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filings {
    pub filings: Vec<Filing>,
}

/// Decoded payload for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "data", rename_all = "snake_case")]
pub enum CategoryData {
    Profile(CompanyProfile),
    FinancialMetrics(FinancialMetrics),
    BalanceSheet(BalanceSheet),
    StockSeries(StockSeries),
    News(NewsData),
    Filings(Filings),
}

impl CategoryData {
    /// Empty-but-valid record for a category
    pub fn empty(category: DataCategory) -> Self {
        match category {
            DataCategory::Profile => CategoryData::Profile(CompanyProfile::default()),
            DataCategory::FinancialMetrics => {
                CategoryData::FinancialMetrics(FinancialMetrics::default())
            }
            DataCategory::BalanceSheet => CategoryData::BalanceSheet(BalanceSheet::default()),
            DataCategory::StockSeries => CategoryData::StockSeries(StockSeries::default()),
            DataCategory::News => CategoryData::News(NewsData::default()),
            DataCategory::Filings => CategoryData::Filings(Filings::default()),
        }
    }

    pub fn category(&self) -> DataCategory {
        match self {
            CategoryData::Profile(_) => DataCategory::Profile,
            CategoryData::FinancialMetrics(_) => DataCategory::FinancialMetrics,
            CategoryData::BalanceSheet(_) => DataCategory::BalanceSheet,
            CategoryData::StockSeries(_) => DataCategory::StockSeries,
            CategoryData::News(_) => DataCategory::News,
            CategoryData::Filings(_) => DataCategory::Filings,
        }
    }

    /// Zero/empty payloads count as absent data
    pub fn is_empty(&self) -> bool {
        match self {
            CategoryData::Profile(p) => p.is_empty(),
            CategoryData::FinancialMetrics(m) => m.periods.is_empty(),
            CategoryData::BalanceSheet(b) => b.periods.is_empty(),
            CategoryData::StockSeries(s) => s.bars.is_empty(),
            CategoryData::News(n) => n.articles.is_empty() && n.answer.is_none(),
            CategoryData::Filings(f) => f.filings.is_empty(),
        }
    }
}

/// One category of fetched data with provenance and freshness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub category: DataCategory,
    /// Name of the adapter that satisfied the category
    pub provenance: String,
    pub fetched_at: DateTime<Utc>,
    pub data: CategoryData,
}

impl SourceRecord {
    pub fn new(provenance: impl Into<String>, data: CategoryData) -> Self {
        Self {
            category: data.category(),
            provenance: provenance.into(),
            fetched_at: Utc::now(),
            data,
        }
    }

    /// A category that no adapter could populate
    pub fn absent(category: DataCategory, provenance: impl Into<String>) -> Self {
        Self::new(provenance, CategoryData::empty(category))
    }

    pub fn is_absent(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Empty,
    Error(String),
}

/// Diagnostic log entry for one adapter tried in a fallback chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub category: DataCategory,
    pub adapter: String,
    pub outcome: AttemptOutcome,
}
