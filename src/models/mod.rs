pub mod records;

pub use records::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A free-form research question with optional explicit hints.
///
/// Fields are private: a question is immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchQuestion {
    text: String,
    company_hint: Option<String>,
    ticker_hint: Option<String>,
    context: Option<String>,
}

impl ResearchQuestion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            company_hint: None,
            ticker_hint: None,
            context: None,
        }
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company_hint = non_empty(company.into());
        self
    }

    pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker_hint = non_empty(ticker.into().to_uppercase());
        self
    }

    /// Free-text web context handed to the synthesizer
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = non_empty(context.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn company_hint(&self) -> Option<&str> {
        self.company_hint.as_deref()
    }

    pub fn ticker_hint(&self) -> Option<&str> {
        self.ticker_hint.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// One independently researchable unit of a question.
///
/// An empty `ticker` means "not yet resolved"; the coordinator looks it up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    pub question: String,
    pub company_name: String,
    pub ticker: String,
    pub metric: String,
    pub time_period: String,
}

impl SubTask {
    pub fn ticker(&self) -> Option<&str> {
        let ticker = self.ticker.trim();
        if ticker.is_empty() {
            None
        } else {
            Some(ticker)
        }
    }

    /// Ticker if known, otherwise the company name
    pub fn subject(&self) -> &str {
        self.ticker().unwrap_or(self.company_name.as_str())
    }
}

/// Aggregate of source records for one sub-task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub subtask: SubTask,
    pub ticker: Option<String>,
    pub records: BTreeMap<DataCategory, SourceRecord>,
    pub attempts: Vec<SourceAttempt>,
    pub error: Option<String>,
}

impl ResearchResult {
    pub fn new(subtask: SubTask, ticker: Option<String>) -> Self {
        Self {
            subtask,
            ticker,
            records: BTreeMap::new(),
            attempts: Vec::new(),
            error: None,
        }
    }

    /// Result carrying only an error string
    pub fn failed(subtask: SubTask, error: impl Into<String>) -> Self {
        let ticker = subtask.ticker().map(str::to_uppercase);
        Self {
            error: Some(error.into()),
            ..Self::new(subtask, ticker)
        }
    }

    /// Populated record for a category; absent categories return `None`
    pub fn record(&self, category: DataCategory) -> Option<&SourceRecord> {
        self.records.get(&category).filter(|r| !r.is_absent())
    }

    pub fn has_data(&self) -> bool {
        self.records.values().any(|r| !r.is_absent())
    }

    pub fn populated_categories(&self) -> Vec<DataCategory> {
        self.records
            .iter()
            .filter(|(_, r)| !r.is_absent())
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn profile(&self) -> Option<&CompanyProfile> {
        match self.record(DataCategory::Profile).map(|r| &r.data) {
            Some(CategoryData::Profile(p)) => Some(p),
            _ => None,
        }
    }

    pub fn financial_metrics(&self) -> Option<&FinancialMetrics> {
        match self.record(DataCategory::FinancialMetrics).map(|r| &r.data) {
            Some(CategoryData::FinancialMetrics(m)) => Some(m),
            _ => None,
        }
    }

    pub fn balance_sheet(&self) -> Option<&BalanceSheet> {
        match self.record(DataCategory::BalanceSheet).map(|r| &r.data) {
            Some(CategoryData::BalanceSheet(b)) => Some(b),
            _ => None,
        }
    }

    pub fn stock_series(&self) -> Option<&StockSeries> {
        match self.record(DataCategory::StockSeries).map(|r| &r.data) {
            Some(CategoryData::StockSeries(s)) => Some(s),
            _ => None,
        }
    }

    pub fn news(&self) -> Option<&NewsData> {
        match self.record(DataCategory::News).map(|r| &r.data) {
            Some(CategoryData::News(n)) => Some(n),
            _ => None,
        }
    }

    pub fn filings(&self) -> Option<&Filings> {
        match self.record(DataCategory::Filings).map(|r| &r.data) {
            Some(CategoryData::Filings(f)) => Some(f),
            _ => None,
        }
    }

    /// Merge another result for the same company into this one.
    ///
    /// A populated record wins over an absent one; the error survives only
    /// while nothing is populated.
    pub fn absorb(&mut self, other: ResearchResult) {
        if self.ticker.is_none() {
            self.ticker = other.ticker;
        }
        for (category, record) in other.records {
            let replace = match self.records.get(&category) {
                None => true,
                Some(existing) => existing.is_absent() && !record.is_absent(),
            };
            if replace {
                self.records.insert(category, record);
            }
        }
        self.attempts.extend(other.attempts);
        if self.has_data() {
            self.error = None;
        } else if self.error.is_none() {
            self.error = other.error;
        }
    }
}

/// Merged research plus narrative analysis for a whole question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub question: String,
    /// Keyed by resolved ticker (company name when unresolved)
    pub company_results: BTreeMap<String, ResearchResult>,
    pub insights: Vec<String>,
    pub comparisons: Vec<String>,
    pub limitations: Vec<String>,
    pub recommendations: Vec<String>,
    pub data_sources: Vec<String>,
    confidence: f64,
    pub analysis_time: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(question: impl Into<String>, company_results: BTreeMap<String, ResearchResult>) -> Self {
        Self {
            question: question.into(),
            company_results,
            insights: Vec::new(),
            comparisons: Vec::new(),
            limitations: Vec::new(),
            recommendations: Vec::new(),
            data_sources: Vec::new(),
            confidence: 0.0,
            analysis_time: Utc::now(),
        }
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Clamped to [0, 1]; NaN becomes 0
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
    }

    pub fn tickers(&self) -> Vec<&str> {
        self.company_results.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub notes: String,
}

/// Per-run stage, advanced strictly forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Decomposing,
    Researching,
    Synthesizing,
    Verifying,
    Done,
}

impl RunStage {
    pub fn next(self) -> Option<RunStage> {
        match self {
            RunStage::Decomposing => Some(RunStage::Researching),
            RunStage::Researching => Some(RunStage::Synthesizing),
            RunStage::Synthesizing => Some(RunStage::Verifying),
            RunStage::Verifying => Some(RunStage::Done),
            RunStage::Done => None,
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Decomposing => "decomposing",
            RunStage::Researching => "researching",
            RunStage::Synthesizing => "synthesizing",
            RunStage::Verifying => "verifying",
            RunStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Final output of a research run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub run_id: Uuid,
    pub short_summary: String,
    pub markdown_report: String,
    pub follow_up_questions: Vec<String>,
    pub verification: VerificationResult,
    pub sub_tasks: Vec<SubTask>,
    pub analysis: AnalysisResult,
    pub stages: Vec<RunStage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_record(revenue: f64) -> SourceRecord {
        SourceRecord::new(
            "alpha_vantage",
            CategoryData::FinancialMetrics(FinancialMetrics {
                periods: vec![FinancialPeriod {
                    fiscal_date: "2024-06-30".to_string(),
                    revenue: Some(revenue),
                    ..Default::default()
                }],
            }),
        )
    }

    fn subtask(ticker: &str) -> SubTask {
        SubTask {
            question: "What is revenue growth?".to_string(),
            company_name: "Apple".to_string(),
            ticker: ticker.to_string(),
            metric: "revenue growth".to_string(),
            time_period: "last 4 quarters".to_string(),
        }
    }

    #[test]
    fn test_question_hints_are_normalized() {
        let q = ResearchQuestion::new("  Analyze Apple  ")
            .with_ticker(" aapl ")
            .with_company("")
            .with_context("Apple reported record services revenue");
        assert_eq!(q.text(), "Analyze Apple");
        assert_eq!(q.ticker_hint(), Some("AAPL"));
        assert_eq!(q.company_hint(), None);
        assert!(q.context().is_some());
    }

    #[test]
    fn test_subtask_ticker_blank_is_unresolved() {
        assert_eq!(subtask("  ").ticker(), None);
        assert_eq!(subtask("  ").subject(), "Apple");
        assert_eq!(subtask("AAPL").subject(), "AAPL");
    }

    #[test]
    fn test_absent_record_accessors_return_none() {
        let mut result = ResearchResult::new(subtask("AAPL"), Some("AAPL".to_string()));
        result
            .records
            .insert(DataCategory::Profile, SourceRecord::absent(DataCategory::Profile, "stub"));
        assert!(result.profile().is_none());
        assert!(!result.has_data());

        result
            .records
            .insert(DataCategory::FinancialMetrics, metrics_record(1.0));
        assert!(result.financial_metrics().is_some());
        assert_eq!(result.populated_categories(), vec![DataCategory::FinancialMetrics]);
    }

    #[test]
    fn test_failed_result_upper_cases_ticker() {
        let failed = ResearchResult::failed(subtask(" aapl "), "nothing found");
        assert_eq!(failed.ticker.as_deref(), Some("AAPL"));
        assert_eq!(failed.error.as_deref(), Some("nothing found"));

        assert!(ResearchResult::failed(subtask(""), "unresolved").ticker.is_none());
    }

    #[test]
    fn test_absorb_prefers_populated_records() {
        let mut first = ResearchResult::failed(subtask("AAPL"), "nothing found");
        first
            .records
            .insert(DataCategory::FinancialMetrics, SourceRecord::absent(DataCategory::FinancialMetrics, "stub"));

        let mut second = ResearchResult::new(subtask("AAPL"), Some("AAPL".to_string()));
        second
            .records
            .insert(DataCategory::FinancialMetrics, metrics_record(42.0));

        first.absorb(second);
        assert!(first.error.is_none());
        let metrics = first.financial_metrics().unwrap();
        assert_eq!(metrics.periods[0].revenue, Some(42.0));
    }

    #[test]
    fn test_confidence_is_clamped() {
        let mut analysis = AnalysisResult::new("q", BTreeMap::new());
        analysis.set_confidence(1.7);
        assert_eq!(analysis.confidence(), 1.0);
        analysis.set_confidence(-0.2);
        assert_eq!(analysis.confidence(), 0.0);
        analysis.set_confidence(f64::NAN);
        assert_eq!(analysis.confidence(), 0.0);
    }

    #[test]
    fn test_run_stage_order() {
        let mut stage = RunStage::Decomposing;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            stage = next;
            seen.push(stage);
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(stage, RunStage::Done);
    }
}
