//! Merge sub-task results into an analysis and a long-form report.
//!
//! Prose comes from the text service, fed a deterministic context object
//! built only from `BTreeMap`-ordered snapshots of the research data. When
//! the service fails the report degrades to the raw-data rendering in
//! [`crate::report`] with an explicit note.

use crate::indicators::{
    assess_risk, growth_metrics, health_ratios, stock_stats, GrowthMetrics, HealthRatios, RiskAssessment, StockStats,
};
use crate::llm::{generate_structured, GenerationRequest, TextGenerator};
use crate::models::{AnalysisResult, CompanyProfile, DataCategory, ResearchQuestion, ResearchResult};
use crate::report::{self, missing_categories};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const MIN_FOLLOW_UPS: usize = 3;
pub const MAX_FOLLOW_UPS: usize = 5;
pub const NARRATIVE_FAILED_NOTE: &str = "Narrative generation failed; this report contains only the aggregated raw data.";

const MAX_HEADLINES: usize = 5;
const MAX_FILINGS: usize = 5;
const UNRESOLVED_KEY: &str = "UNRESOLVED";

const ANALYSIS_SYSTEM_PROMPT: &str = "You are a financial analyst. Analyze the research data to \
generate insights, comparisons, limitations, and recommendations. Focus on key metrics and trends. \
Respond with a JSON object only, no markdown formatting.";

const REPORT_SYSTEM_PROMPT: &str = "You are a senior financial writer. Write a clear, well-structured \
markdown research report from the supplied data and analysis. Use only the numbers provided; write \
\"Not Available\" for anything missing. Respond with a JSON object only.";

/// Narrative analysis as returned by the text service
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct NarrativeResponse {
    insights: Vec<String>,
    comparisons: Vec<String>,
    limitations: Vec<String>,
    recommendations: Vec<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReportResponse {
    short_summary: String,
    markdown_report: String,
    #[serde(default)]
    follow_up_questions: Vec<String>,
}

/// Output of the synthesis stage
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub analysis: AnalysisResult,
    pub short_summary: String,
    pub markdown_report: String,
    pub follow_up_questions: Vec<String>,
    /// False when the raw-data report was used
    pub narrative_generated: bool,
}

/// Fully populated, deterministically ordered view of one company
#[derive(Debug, Clone, Serialize)]
pub struct CompanyContext {
    pub company_name: String,
    pub profile: Option<CompanyProfile>,
    pub latest_period: Option<String>,
    pub latest_revenue: Option<f64>,
    pub latest_net_income: Option<f64>,
    pub growth: GrowthMetrics,
    pub health: HealthRatios,
    pub stock: StockStats,
    pub risk: RiskAssessment,
    pub headlines: Vec<String>,
    pub news_summary: Option<String>,
    pub recent_filings: Vec<String>,
    pub missing_categories: Vec<DataCategory>,
    pub sources: BTreeMap<DataCategory, String>,
    pub error: Option<String>,
}

/// Everything the text service sees, serialized to stable JSON
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisContext {
    pub question: String,
    pub sub_questions: Vec<String>,
    pub companies: BTreeMap<String, CompanyContext>,
    pub web_context: Option<String>,
}

impl SynthesisContext {
    /// `sub_questions` must come from the results before grouping, since a
    /// merged result keeps only its first sub-task
    pub fn build(question: &ResearchQuestion, sub_questions: Vec<String>, analysis: &AnalysisResult) -> Self {
        let companies = analysis
            .company_results
            .iter()
            .map(|(key, result)| (key.clone(), company_context(result)))
            .collect();

        Self {
            question: question.text().to_string(),
            sub_questions,
            companies,
            web_context: question.context().map(str::to_string),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize synthesis context: {}", e);
            String::from("{}")
        })
    }
}

fn company_context(result: &ResearchResult) -> CompanyContext {
    let metrics = result.financial_metrics();
    let latest = metrics.and_then(|m| m.latest());
    let stock = result.stock_series().map(stock_stats).unwrap_or_default();
    let risk = assess_risk(result.profile(), result.balance_sheet(), &stock);

    CompanyContext {
        company_name: result.subtask.company_name.clone(),
        profile: result.profile().cloned(),
        latest_period: latest.map(|p| p.fiscal_date.clone()),
        latest_revenue: latest.and_then(|p| p.revenue),
        latest_net_income: latest.and_then(|p| p.net_income),
        growth: metrics.map(growth_metrics).unwrap_or_default(),
        health: result
            .balance_sheet()
            .map(|b| health_ratios(b, metrics))
            .unwrap_or_default(),
        stock,
        risk,
        headlines: result
            .news()
            .map(|n| n.articles.iter().take(MAX_HEADLINES).map(|a| a.title.clone()).collect())
            .unwrap_or_default(),
        news_summary: result.news().and_then(|n| n.answer.clone()),
        recent_filings: result
            .filings()
            .map(|f| {
                f.filings
                    .iter()
                    .take(MAX_FILINGS)
                    .map(|filing| format!("{} ({})", filing.form, filing.filed))
                    .collect()
            })
            .unwrap_or_default(),
        missing_categories: missing_categories(result),
        sources: result
            .records
            .iter()
            .filter(|(_, r)| !r.is_absent())
            .map(|(c, r)| (*c, r.provenance.clone()))
            .collect(),
        error: result.error.clone(),
    }
}

/// Non-empty sub-task questions in first-seen order, without duplicates
pub fn sub_questions(results: &[ResearchResult]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    results
        .iter()
        .map(|r| r.subtask.question.trim())
        .filter(|q| !q.is_empty() && seen.insert(q.to_string()))
        .map(str::to_string)
        .collect()
}

/// Group results by resolved ticker, merging sub-tasks for the same company
pub fn group_results(results: Vec<ResearchResult>) -> BTreeMap<String, ResearchResult> {
    let mut grouped: BTreeMap<String, ResearchResult> = BTreeMap::new();
    for result in results {
        let key = result
            .ticker
            .clone()
            .or_else(|| {
                let name = result.subtask.company_name.trim();
                (!name.is_empty()).then(|| name.to_string())
            })
            .unwrap_or_else(|| UNRESOLVED_KEY.to_string());

        match grouped.entry(key) {
            Entry::Occupied(mut existing) => existing.get_mut().absorb(result),
            Entry::Vacant(slot) => {
                slot.insert(result);
            }
        }
    }
    grouped
}

/// Share of (company, category) pairs that were populated
pub fn data_coverage(analysis: &AnalysisResult) -> f64 {
    let slots = analysis.company_results.len() * DataCategory::ALL.len();
    if slots == 0 {
        return 0.0;
    }
    let populated: usize = analysis
        .company_results
        .values()
        .map(|r| r.populated_categories().len())
        .sum();
    populated as f64 / slots as f64
}

fn data_sources(analysis: &AnalysisResult) -> Vec<String> {
    analysis
        .company_results
        .values()
        .flat_map(|r| r.records.values())
        .filter(|r| !r.is_absent())
        .map(|r| r.provenance.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Deterministic limitations derived from what could not be fetched
fn data_gap_limitations(analysis: &AnalysisResult) -> Vec<String> {
    analysis
        .company_results
        .iter()
        .filter_map(|(key, result)| {
            if let Some(error) = &result.error {
                return Some(format!("{}: {}", key, error));
            }
            let missing = missing_categories(result);
            if missing.is_empty() {
                return None;
            }
            let labels: Vec<&str> = missing.iter().map(|c| c.label()).collect();
            Some(format!("{}: {} not available", key, labels.join(", ")))
        })
        .collect()
}

/// Trim, de-duplicate and cap follow-ups, topping up from data gaps
pub fn normalize_follow_ups(raw: Vec<String>, analysis: &AnalysisResult) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut follow_ups: Vec<String> = raw
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(MAX_FOLLOW_UPS)
        .collect();

    if follow_ups.len() < MIN_FOLLOW_UPS {
        for candidate in default_follow_ups(analysis) {
            if follow_ups.len() >= MIN_FOLLOW_UPS {
                break;
            }
            if seen.insert(candidate.to_lowercase()) {
                follow_ups.push(candidate);
            }
        }
    }
    follow_ups
}

fn default_follow_ups(analysis: &AnalysisResult) -> Vec<String> {
    let mut questions = Vec::new();
    for (key, result) in &analysis.company_results {
        for category in missing_categories(result) {
            questions.push(format!("Where can {} {} data be sourced?", key, category.label().to_lowercase()));
        }
    }
    for key in analysis.company_results.keys() {
        questions.push(format!("What are the main risks facing {} over the next year?", key));
        questions.push(format!("How does {}'s valuation compare to its industry peers?", key));
    }
    questions.push(format!("How might macroeconomic conditions affect the answer to: {}", analysis.question));
    questions.push("Which metrics should be monitored in the next earnings report?".to_string());
    questions.push("How have analyst expectations changed over the last quarter?".to_string());
    questions
}

pub struct Synthesizer {
    generator: Arc<dyn TextGenerator>,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn synthesize(
        &self,
        question: &ResearchQuestion,
        results: Vec<ResearchResult>,
        cancel: &CancellationToken,
    ) -> Synthesis {
        let asked = sub_questions(&results);
        let mut analysis = AnalysisResult::new(question.text(), group_results(results));
        analysis.data_sources = data_sources(&analysis);

        let context = SynthesisContext::build(question, asked, &analysis);
        let context_json = context.to_json();

        self.analyze(&mut analysis, &context_json, cancel).await;

        let request = GenerationRequest::new(
            "financial_report",
            REPORT_SYSTEM_PROMPT,
            build_report_prompt(&context_json, &analysis),
        );

        let report = generate_structured::<ReportResponse>(self.generator.as_ref(), &request, cancel)
            .await
            .and_then(|r| {
                if r.markdown_report.trim().is_empty() {
                    Err(crate::error::LlmError::NonConforming("empty markdown_report".to_string()))
                } else {
                    Ok(r)
                }
            });

        match report {
            Ok(report) => {
                let follow_up_questions = normalize_follow_ups(report.follow_up_questions, &analysis);
                let short_summary = if report.short_summary.trim().is_empty() {
                    report::fallback_summary(&analysis)
                } else {
                    report.short_summary.trim().to_string()
                };
                Synthesis {
                    short_summary,
                    markdown_report: report.markdown_report,
                    follow_up_questions,
                    analysis,
                    narrative_generated: true,
                }
            }
            Err(e) => {
                tracing::error!("Report generation failed, rendering raw data: {}", e);
                let note = format!("{} ({})", NARRATIVE_FAILED_NOTE, e);
                Synthesis {
                    short_summary: report::fallback_summary(&analysis),
                    markdown_report: report::render_fallback(&analysis, &note),
                    follow_up_questions: normalize_follow_ups(Vec::new(), &analysis),
                    analysis,
                    narrative_generated: false,
                }
            }
        }
    }

    /// Fill the narrative fields of `analysis`; defaults when the service fails
    async fn analyze(&self, analysis: &mut AnalysisResult, context_json: &str, cancel: &CancellationToken) {
        let prompt = format!(
            "Research data:\n{}\n\nReturn ONLY a JSON object with these fields:\n\
             - insights: list of key insights (strings)\n\
             - comparisons: list of comparative points (strings)\n\
             - limitations: list of data limitations (strings)\n\
             - recommendations: list of actionable recommendations (strings)\n\
             - confidence: confidence score (number between 0 and 1)",
            context_json
        );
        let request = GenerationRequest::new("analysis", ANALYSIS_SYSTEM_PROMPT, prompt);
        let coverage = data_coverage(analysis);

        match generate_structured::<NarrativeResponse>(self.generator.as_ref(), &request, cancel).await {
            Ok(narrative) => {
                analysis.insights = narrative.insights;
                analysis.comparisons = narrative.comparisons;
                analysis.limitations = narrative.limitations;
                analysis.recommendations = narrative.recommendations;
                analysis.set_confidence(narrative.confidence.unwrap_or(coverage));
            }
            Err(e) => {
                tracing::warn!("Narrative analysis failed, using defaults: {}", e);
                let gaps = data_gap_limitations(analysis);
                analysis.limitations = vec!["Narrative analysis unavailable".to_string()];
                analysis.limitations.extend(gaps);
                analysis.set_confidence(0.5 * coverage);
            }
        }
    }
}

fn build_report_prompt(context_json: &str, analysis: &AnalysisResult) -> String {
    let narrative = serde_json::json!({
        "insights": analysis.insights,
        "comparisons": analysis.comparisons,
        "limitations": analysis.limitations,
        "recommendations": analysis.recommendations,
        "confidence": analysis.confidence(),
        "data_sources": analysis.data_sources,
    });

    format!(
        "Question: {}\n\nResearch data:\n{}\n\nAnalysis:\n{}\n\n\
         Write the report. Return ONLY a JSON object with these fields:\n\
         - short_summary: 2-3 sentence executive summary\n\
         - markdown_report: the full markdown report, one section per company\n\
         - follow_up_questions: 3 to 5 follow-up research questions",
        analysis.question,
        context_json,
        serde_json::to_string_pretty(&narrative).unwrap_or_default()
    )
}
