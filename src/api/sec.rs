use super::{
    non_blank, params, CategoryOutcome, CategorySource, CompanyTarget, FetchOutcome, Params,
    Provider, SourceAdapter, TickerLookup,
};
use crate::cache::Volatility;
use crate::error::SourceError;
use crate::models::{
    BalanceSheet, BalanceSheetPeriod, CategoryData, CompanyProfile, DataCategory, Filing, Filings,
    FinancialMetrics, FinancialPeriod,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "sec";
const MAX_PERIODS: usize = 8;
const MAX_FILINGS: usize = 10;
const REPORT_FORMS: [&str; 6] = ["10-K", "10-Q", "8-K", "20-F", "40-F", "6-K"];

const REVENUE_CONCEPTS: [&str; 3] = [
    "RevenueFromContractWithCustomerExcludingAssessedTax",
    "Revenues",
    "SalesRevenueNet",
];
const NET_INCOME_CONCEPTS: [&str; 2] = ["NetIncomeLoss", "ProfitLoss"];

/// SEC EDGAR JSON APIs. Every data set here is filing-based and slow-changing.
#[derive(Clone)]
pub struct SecProvider {
    client: Client,
    data_url: String,
    tickers_url: String,
}

impl SecProvider {
    pub fn new(
        user_agent: &str,
        data_url: &str,
        tickers_url: &str,
        timeout: Duration,
    ) -> crate::Result<Self> {
        // EDGAR rejects anonymous clients
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            data_url: data_url.trim_end_matches('/').to_string(),
            tickers_url: tickers_url.to_string(),
        })
    }

    fn url_for(&self, endpoint: &str, params: &Params) -> Result<String, SourceError> {
        let cik = || {
            params
                .get("cik")
                .map(|cik| pad_cik(cik))
                .ok_or_else(|| SourceError::Permanent(format!("{} requires a cik", endpoint)))
        };
        match endpoint {
            "company_tickers" => Ok(self.tickers_url.clone()),
            "submissions" => Ok(format!("{}/submissions/CIK{}.json", self.data_url, cik()?)),
            "companyfacts" => Ok(format!(
                "{}/api/xbrl/companyfacts/CIK{}.json",
                self.data_url,
                cik()?
            )),
            other => Err(SourceError::Permanent(format!("unknown SEC endpoint {}", other))),
        }
    }
}

/// CIKs are addressed as 10 zero-padded digits
pub fn pad_cik(cik: &str) -> String {
    format!("{:0>10}", cik.trim())
}

#[async_trait]
impl Provider for SecProvider {
    fn namespace(&self) -> &str {
        NAMESPACE
    }

    fn volatility(&self, _endpoint: &str) -> Volatility {
        Volatility::Slow
    }

    async fn call(&self, endpoint: &str, params: &Params) -> Result<Value, SourceError> {
        let url = self.url_for(endpoint, params)?;
        tracing::debug!("SEC request: {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
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
struct TickerEntry {
    cik_str: u64,
    ticker: String,
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct CompanyFacts {
    #[serde(default)]
    facts: Taxonomies,
}

#[derive(Debug, Default, Deserialize)]
struct Taxonomies {
    #[serde(rename = "us-gaap", default)]
    us_gaap: HashMap<String, Concept>,
}

#[derive(Debug, Default, Deserialize)]
struct Concept {
    #[serde(default)]
    units: HashMap<String, Vec<FactEntry>>,
}

#[derive(Debug, Deserialize)]
struct FactEntry {
    start: Option<String>,
    end: String,
    val: f64,
    form: Option<String>,
    filed: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Submissions {
    name: Option<String>,
    #[serde(default)]
    tickers: Vec<String>,
    #[serde(default)]
    exchanges: Vec<String>,
    sic_description: Option<String>,
    description: Option<String>,
    #[serde(default)]
    filings: SubmissionFilings,
}

#[derive(Debug, Default, Deserialize)]
struct SubmissionFilings {
    #[serde(default)]
    recent: RecentFilings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    primary_doc_description: Vec<String>,
}

// ============== Decoders ==============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeriodKind {
    Quarter,
    Year,
}

fn period_kind(entry: &FactEntry) -> Option<PeriodKind> {
    let start = NaiveDate::parse_from_str(entry.start.as_deref()?, "%Y-%m-%d").ok()?;
    let end = NaiveDate::parse_from_str(&entry.end, "%Y-%m-%d").ok()?;
    match (end - start).num_days() {
        80..=100 => Some(PeriodKind::Quarter),
        350..=380 => Some(PeriodKind::Year),
        _ => None,
    }
}

fn is_report_form(entry: &FactEntry) -> bool {
    matches!(entry.form.as_deref(), Some("10-K") | Some("10-Q") | Some("20-F") | Some("40-F"))
}

/// Values keyed by period end. Earlier concepts win per date; within one
/// concept the latest filing wins.
fn collect_series<F>(facts: &CompanyFacts, concepts: &[&str], keep: F) -> BTreeMap<String, f64>
where
    F: Fn(&FactEntry) -> bool,
{
    let mut series = BTreeMap::new();
    for concept in concepts {
        let Some(found) = facts.facts.us_gaap.get(*concept) else {
            continue;
        };
        let mut per_concept: BTreeMap<&str, (&str, f64)> = BTreeMap::new();
        for entry in found.units.values().flatten() {
            if !is_report_form(entry) || !keep(entry) {
                continue;
            }
            let filed = entry.filed.as_deref().unwrap_or("");
            let slot = per_concept.entry(entry.end.as_str()).or_insert((filed, entry.val));
            if filed > slot.0 {
                *slot = (filed, entry.val);
            }
        }
        for (end, (_, val)) in per_concept {
            series.entry(end.to_string()).or_insert(val);
        }
    }
    series
}

fn flow_series(facts: &CompanyFacts, concepts: &[&str], kind: PeriodKind) -> BTreeMap<String, f64> {
    collect_series(facts, concepts, |entry| period_kind(entry) == Some(kind))
}

fn instant_series(facts: &CompanyFacts, concepts: &[&str]) -> BTreeMap<String, f64> {
    collect_series(facts, concepts, |entry| entry.start.is_none())
}

fn newest_dates<'a>(series: impl IntoIterator<Item = &'a BTreeMap<String, f64>>) -> Vec<String> {
    let dates: BTreeSet<&String> = series.into_iter().flat_map(|s| s.keys()).collect();
    dates.into_iter().rev().take(MAX_PERIODS).cloned().collect()
}

pub fn decode_financial_metrics(payload: &Value) -> Result<FinancialMetrics, serde_json::Error> {
    let facts = CompanyFacts::deserialize(payload)?;

    // Quarterly figures when the company files them, annual otherwise
    let quarterly = flow_series(&facts, &REVENUE_CONCEPTS, PeriodKind::Quarter);
    let kind = if quarterly.is_empty() {
        PeriodKind::Year
    } else {
        PeriodKind::Quarter
    };

    let revenue = flow_series(&facts, &REVENUE_CONCEPTS, kind);
    let net_income = flow_series(&facts, &NET_INCOME_CONCEPTS, kind);
    let gross_profit = flow_series(&facts, &["GrossProfit"], kind);
    let operating_income = flow_series(&facts, &["OperatingIncomeLoss"], kind);
    let eps = flow_series(&facts, &["EarningsPerShareBasic"], kind);

    let periods = newest_dates([&revenue, &net_income])
        .into_iter()
        .map(|date| FinancialPeriod {
            revenue: revenue.get(&date).copied(),
            gross_profit: gross_profit.get(&date).copied(),
            operating_income: operating_income.get(&date).copied(),
            net_income: net_income.get(&date).copied(),
            eps: eps.get(&date).copied(),
            fiscal_date: date,
        })
        .collect();

    Ok(FinancialMetrics { periods })
}

pub fn decode_balance_sheet(payload: &Value) -> Result<BalanceSheet, serde_json::Error> {
    let facts = CompanyFacts::deserialize(payload)?;

    let assets = instant_series(&facts, &["Assets"]);
    let liabilities = instant_series(&facts, &["Liabilities"]);
    let equity = instant_series(
        &facts,
        &["StockholdersEquity", "StockholdersEquityIncludingPortionAttributableToNoncontrollingInterest"],
    );
    let cash = instant_series(&facts, &["CashAndCashEquivalentsAtCarryingValue"]);
    let debt = instant_series(&facts, &["LongTermDebtNoncurrent", "LongTermDebt"]);

    let periods = newest_dates([&assets, &liabilities])
        .into_iter()
        .map(|date| BalanceSheetPeriod {
            total_assets: assets.get(&date).copied(),
            total_liabilities: liabilities.get(&date).copied(),
            shareholder_equity: equity.get(&date).copied(),
            cash: cash.get(&date).copied(),
            long_term_debt: debt.get(&date).copied(),
            fiscal_date: date,
        })
        .collect();

    Ok(BalanceSheet { periods })
}

pub fn decode_profile(payload: &Value, cik: &str) -> Result<CompanyProfile, serde_json::Error> {
    let raw = Submissions::deserialize(payload)?;
    Ok(CompanyProfile {
        name: non_blank(raw.name),
        ticker: raw.tickers.into_iter().next(),
        cik: Some(pad_cik(cik)),
        exchange: raw.exchanges.into_iter().next(),
        industry: non_blank(raw.sic_description),
        description: non_blank(raw.description),
        ..Default::default()
    })
}

pub fn decode_filings(payload: &Value) -> Result<Filings, serde_json::Error> {
    let raw = Submissions::deserialize(payload)?;
    let recent = raw.filings.recent;
    let filings = recent
        .form
        .iter()
        .enumerate()
        .filter(|(_, form)| REPORT_FORMS.contains(&form.as_str()))
        .take(MAX_FILINGS)
        .map(|(i, form)| Filing {
            form: form.clone(),
            filed: recent.filing_date.get(i).cloned().unwrap_or_default(),
            accession: recent.accession_number.get(i).cloned().unwrap_or_default(),
            description: recent
                .primary_doc_description
                .get(i)
                .cloned()
                .filter(|d| !d.is_empty()),
        })
        .collect();
    Ok(Filings { filings })
}

fn decode_ticker_map(payload: &Value) -> Result<Vec<TickerEntry>, serde_json::Error> {
    let map = HashMap::<String, TickerEntry>::deserialize(payload)?;
    let mut entries: Vec<TickerEntry> = map.into_values().collect();
    // Map keys are rank order; keep it stable for name matching
    entries.sort_by_key(|e| e.cik_str);
    Ok(entries)
}

fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .replace([',', '.'], "")
        .trim()
        .to_string()
}

// ============== Category Source ==============

/// Filings-based secondary source; also the only source of filing lists
#[derive(Clone)]
pub struct SecSource {
    adapter: SourceAdapter,
}

impl SecSource {
    pub fn new(adapter: SourceAdapter) -> Self {
        Self { adapter }
    }

    async fn ticker_map(&self, cancel: &CancellationToken) -> Result<Vec<TickerEntry>, String> {
        match self.adapter.fetch("company_tickers", &Params::new(), cancel).await {
            FetchOutcome::Payload(payload) => {
                decode_ticker_map(&payload).map_err(|e| format!("malformed ticker map: {}", e))
            }
            FetchOutcome::Unavailable(reason) | FetchOutcome::Rejected(reason) => Err(reason),
        }
    }

    async fn cik_for(&self, ticker: &str, cancel: &CancellationToken) -> Result<String, String> {
        let entries = self.ticker_map(cancel).await?;
        entries
            .iter()
            .find(|e| e.ticker.eq_ignore_ascii_case(ticker))
            .map(|e| e.cik_str.to_string())
            .ok_or_else(|| format!("no CIK for {}", ticker))
    }
}

#[async_trait]
impl CategorySource for SecSource {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn supports(&self, category: DataCategory) -> bool {
        matches!(
            category,
            DataCategory::Profile
                | DataCategory::FinancialMetrics
                | DataCategory::BalanceSheet
                | DataCategory::Filings
        )
    }

    async fn fetch_category(
        &self,
        category: DataCategory,
        target: &CompanyTarget,
        cancel: &CancellationToken,
    ) -> CategoryOutcome {
        if !self.supports(category) {
            return CategoryOutcome::Failed(format!("{} not offered", category));
        }
        let cik = match self.cik_for(&target.ticker, cancel).await {
            Ok(cik) => cik,
            Err(reason) => return CategoryOutcome::Failed(reason),
        };

        let endpoint = match category {
            DataCategory::Profile | DataCategory::Filings => "submissions",
            _ => "companyfacts",
        };
        let payload = match self.adapter.fetch(endpoint, &params([("cik", cik.as_str())]), cancel).await {
            FetchOutcome::Payload(payload) => payload,
            FetchOutcome::Unavailable(reason) | FetchOutcome::Rejected(reason) => {
                return CategoryOutcome::Failed(reason)
            }
        };

        let decoded = match category {
            DataCategory::Profile => decode_profile(&payload, &cik).map(CategoryData::Profile),
            DataCategory::Filings => decode_filings(&payload).map(CategoryData::Filings),
            DataCategory::FinancialMetrics => {
                decode_financial_metrics(&payload).map(CategoryData::FinancialMetrics)
            }
            _ => decode_balance_sheet(&payload).map(CategoryData::BalanceSheet),
        };

        match decoded {
            Ok(data) => CategoryOutcome::from_data(data),
            Err(e) => CategoryOutcome::Failed(format!("malformed {} payload: {}", endpoint, e)),
        }
    }
}

#[async_trait]
impl TickerLookup for SecSource {
    /// Match the company name against registrant titles
    async fn resolve(&self, company: &str, cancel: &CancellationToken) -> Option<String> {
        let wanted = normalize_name(company);
        if wanted.is_empty() {
            return None;
        }
        let entries = self.ticker_map(cancel).await.ok()?;

        let exact = entries.iter().find(|e| normalize_name(&e.title) == wanted);
        let prefix = || {
            entries
                .iter()
                .find(|e| normalize_name(&e.title).starts_with(&format!("{} ", wanted)))
        };
        exact.or_else(prefix).map(|e| e.ticker.to_uppercase())
    }
}
