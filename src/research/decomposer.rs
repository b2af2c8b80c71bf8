//! Question decomposition.
//!
//! The text service proposes sub-tasks; this module validates them and owns
//! the local heuristic used whenever the service fails or proposes nothing
//! usable.

use crate::api::ticker::looks_like_ticker;
use crate::api::TickerLookup;
use crate::llm::{generate_structured, GenerationRequest, TextGenerator};
use crate::models::{ResearchQuestion, SubTask};
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TIME_PERIOD: &str = "last 4 quarters";
const MAX_SUB_TASKS: usize = 12;
const MAX_COMPANY_TOKENS: usize = 4;

const SYSTEM_PROMPT: &str = "You are a financial research planner. Break the question into \
independent research sub-tasks, one per company and metric. Respond with a JSON object only, \
no markdown formatting.";

/// Capitalised words that never name a company on their own
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "what", "how", "why", "which", "who", "when", "where", "is", "are", "was",
    "were", "does", "do", "did", "can", "could", "should", "would", "will", "has", "have", "tell",
    "show", "give", "explain", "describe", "please", "compare", "analyze", "analyse", "research",
    "examine", "study", "investigate", "evaluate", "assess", "i", "in", "on", "of", "for", "and",
    "or", "vs", "versus", "between", "over", "last", "past", "revenue", "revenues", "profit",
    "profits", "stock", "stocks", "share", "shares", "growth", "performance", "margin", "margins",
    "earnings", "eps", "ceo", "cfo", "usd", "us", "yoy", "qoq", "ai", "etf", "ipo", "gdp", "q1",
    "q2", "q3", "q4", "fy", "me", "my", "it", "its", "their", "recent", "latest", "current",
];

const SEPARATORS: &[&str] = &["and", "vs", "vs.", "versus", "&", "or", "with"];

/// Raw sub-task as proposed by the text service; every field may be missing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ProposedSubTask {
    question: Option<String>,
    company_name: Option<String>,
    ticker: Option<String>,
    metric: Option<String>,
    time_period: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DecompositionResponse {
    Wrapped { sub_tasks: Vec<ProposedSubTask> },
    List(Vec<ProposedSubTask>),
}

impl DecompositionResponse {
    fn into_sub_tasks(self) -> Vec<ProposedSubTask> {
        match self {
            DecompositionResponse::Wrapped { sub_tasks } => sub_tasks,
            DecompositionResponse::List(sub_tasks) => sub_tasks,
        }
    }
}

/// Company found by the heuristic, with a ticker when one was written out
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    name: String,
    ticker: Option<String>,
}

pub struct Decomposer {
    generator: Arc<dyn TextGenerator>,
    lookup: Arc<dyn TickerLookup>,
    company_patterns: Vec<Regex>,
    period_patterns: Vec<Regex>,
}

impl Decomposer {
    pub fn new(generator: Arc<dyn TextGenerator>, lookup: Arc<dyn TickerLookup>) -> Self {
        let company_patterns = [
            r"(?i)\b(?:analy[sz]e|research|examine|study|investigate|compare|evaluate|assess)\s+(.+?)['’]s\b",
            r"(?i)\b(?:analy[sz]e|research|examine|study|investigate|compare|evaluate|assess)\s+(.+?)\s+(?:revenue|sales|profit|margin|growth|stock|share|performance|earnings|financial)",
            r"(?i)^(.+?)['’]s\s+(?:revenue|sales|profit|margin|growth|stock|share|performance|earnings|financial)",
            r"(?i)(.+?)['’]s\b",
        ];
        let period_patterns = [
            r"(?i)\b(?:last|past|previous)\s+(?:\d+|two|three|four|five|six|eight|ten|few|several)\s+(?:fiscal\s+)?(?:quarters?|years?|months?)\b",
            r"(?i)\b(?:last|past|previous)\s+(?:quarter|year|month)\b",
            r"(?i)\bQ[1-4]\s?(?:FY\s?)?(?:19|20)?\d{2}\b",
            r"(?i)\b(?:FY\s?)?(?:19|20)\d{2}\b",
        ];

        Self {
            generator,
            lookup,
            company_patterns: company_patterns
                .into_iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
            period_patterns: period_patterns
                .into_iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }

    /// Break a question into sub-tasks.
    ///
    /// Never fails: service errors and unusable proposals fall back to the
    /// heuristic. An empty list means nothing company-like was found.
    pub async fn decompose(&self, question: &ResearchQuestion, cancel: &CancellationToken) -> Vec<SubTask> {
        let request = GenerationRequest::new("decomposition", SYSTEM_PROMPT, build_prompt(question));

        match generate_structured::<DecompositionResponse>(self.generator.as_ref(), &request, cancel).await {
            Ok(response) => {
                let proposed = response.into_sub_tasks();
                let proposed_count = proposed.len();
                let validated = self.validate(proposed, question, cancel).await;
                if !validated.is_empty() {
                    tracing::info!("🧩 Decomposed into {} sub-task(s)", validated.len());
                    return validated;
                }
                tracing::warn!(
                    "No usable sub-tasks among {} proposed; using heuristic decomposition",
                    proposed_count
                );
            }
            Err(e) => {
                tracing::warn!("Decomposition service failed, using heuristic decomposition: {}", e);
            }
        }

        let sub_tasks = self.heuristic(question, cancel).await;
        tracing::info!("🧩 Heuristic decomposition produced {} sub-task(s)", sub_tasks.len());
        sub_tasks
    }

    async fn validate(
        &self,
        proposed: Vec<ProposedSubTask>,
        question: &ResearchQuestion,
        cancel: &CancellationToken,
    ) -> Vec<SubTask> {
        let default_period = self.detect_period(question.text());
        let mut sub_tasks = Vec::new();

        for raw in proposed.into_iter().take(MAX_SUB_TASKS) {
            let mut company = clean(raw.company_name);
            let text = clean(raw.question);
            if company.is_empty() && text.is_empty() {
                tracing::debug!("Dropping sub-task with neither company nor question");
                continue;
            }
            if company.is_empty() {
                company = question
                    .company_hint()
                    .or(question.ticker_hint())
                    .unwrap_or_default()
                    .to_string();
            }

            let metric = non_empty_or(clean(raw.metric), "financial performance");
            let text = if text.is_empty() {
                format!("What is {}'s {}?", company, metric)
            } else {
                text
            };

            let mut ticker = clean(raw.ticker).to_uppercase();
            if ticker.is_empty() {
                ticker = self.resolve_ticker(&company, question, cancel).await;
            }

            sub_tasks.push(SubTask {
                question: text,
                company_name: company,
                ticker,
                metric,
                time_period: non_empty_or(clean(raw.time_period), &default_period),
            });
        }
        sub_tasks
    }

    /// Hint first, then the lookup collaborator; empty when neither knows it
    async fn resolve_ticker(&self, company: &str, question: &ResearchQuestion, cancel: &CancellationToken) -> String {
        if let Some(ticker) = question.ticker_hint() {
            let hinted_company = question.company_hint().unwrap_or(ticker);
            if company.is_empty() || company.eq_ignore_ascii_case(hinted_company) {
                return ticker.to_string();
            }
        }
        if company.is_empty() {
            return String::new();
        }
        self.lookup.resolve(company, cancel).await.unwrap_or_default()
    }

    /// Pattern-based decomposition used when the text service is unusable
    pub async fn heuristic(&self, question: &ResearchQuestion, cancel: &CancellationToken) -> Vec<SubTask> {
        let mut candidates = self.extract_companies(question.text());

        if let Some(hint) = question.company_hint().or(question.ticker_hint()) {
            if !candidates.iter().any(|c| c.name.eq_ignore_ascii_case(hint)) {
                candidates.insert(
                    0,
                    Candidate {
                        name: hint.to_string(),
                        ticker: question.ticker_hint().map(str::to_string),
                    },
                );
            }
        }

        if candidates.len() > MAX_SUB_TASKS {
            tracing::warn!(
                "Question names {} companies; researching the first {}",
                candidates.len(),
                MAX_SUB_TASKS
            );
            candidates.truncate(MAX_SUB_TASKS);
        }

        let metrics = metrics_for(question.text());
        let metrics = &metrics[..metrics_per_company(candidates.len(), metrics.len())];
        let time_period = self.detect_period(question.text());
        let mut sub_tasks = Vec::new();

        for candidate in candidates {
            let ticker = match candidate.ticker {
                Some(ticker) => ticker,
                None => self.resolve_ticker(&candidate.name, question, cancel).await,
            };
            for metric in metrics {
                sub_tasks.push(SubTask {
                    question: format!("What is {}'s {}?", candidate.name, metric),
                    company_name: candidate.name.clone(),
                    ticker: ticker.clone(),
                    metric: metric.to_string(),
                    time_period: time_period.clone(),
                });
            }
        }
        sub_tasks
    }

    /// Companies named in the question, in order of appearance
    fn extract_companies(&self, text: &str) -> Vec<Candidate> {
        for pattern in &self.company_patterns {
            let Some(phrase) = pattern.captures(text).and_then(|c| c.get(1)) else {
                continue;
            };
            let candidates = candidates_in(phrase.as_str());
            if !candidates.is_empty() {
                return candidates;
            }
        }
        candidates_in(text)
    }

    fn detect_period(&self, text: &str) -> String {
        self.period_patterns
            .iter()
            .find_map(|p| p.find(text))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| DEFAULT_TIME_PERIOD.to_string())
    }
}

fn build_prompt(question: &ResearchQuestion) -> String {
    let mut prompt = format!("Question: {}\n", question.text());
    if let Some(company) = question.company_hint() {
        prompt.push_str(&format!("Company hint: {}\n", company));
    }
    if let Some(ticker) = question.ticker_hint() {
        prompt.push_str(&format!("Ticker hint: {}\n", ticker));
    }
    prompt.push_str(
        r#"
Generate specific sub-tasks that together answer the question.
Requirements:
1. Each sub-task focuses on one company and one metric
2. Include the time period if the question specifies one
3. Cover every company mentioned when the question is a comparison

Return ONLY a JSON object of this shape:
{
    "sub_tasks": [
        {
            "question": "specific sub-question",
            "company_name": "company name",
            "ticker": "ticker symbol if known, else empty",
            "metric": "metric being asked about",
            "time_period": "time period if specified"
        }
    ]
}"#,
    );
    prompt
}

fn clean(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

fn metrics_for(text: &str) -> [&'static str; 3] {
    let text = text.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if mentions(&["revenue", "sales"]) {
        ["revenue growth", "revenue trends", "profit margins"]
    } else if mentions(&["profit", "margin", "income", "earnings"]) {
        ["profit margins", "operating margins", "net income"]
    } else if mentions(&["stock", "share", "price"]) {
        ["stock price", "stock performance", "trading volume"]
    } else {
        ["revenue growth", "profit margins", "stock performance"]
    }
}

/// How many metrics each company gets so that every company stays under the cap
fn metrics_per_company(companies: usize, available: usize) -> usize {
    if companies == 0 {
        return available;
    }
    let per_company = (MAX_SUB_TASKS / companies).clamp(1, available);
    if per_company < available {
        tracing::info!(
            "Researching {} of {} metrics for each of {} companies",
            per_company,
            available,
            companies
        );
    }
    per_company
}

/// Split a phrase on list separators and pull one company out of each part
fn candidates_in(phrase: &str) -> Vec<Candidate> {
    let mut parts: Vec<Vec<String>> = vec![Vec::new()];
    for raw in phrase.split_whitespace() {
        let ends_part = raw.ends_with(',') || raw.ends_with(';');
        let token = clean_token(raw);
        if SEPARATORS.contains(&raw.to_lowercase().as_str()) || SEPARATORS.contains(&token.to_lowercase().as_str()) {
            parts.push(Vec::new());
            continue;
        }
        if let Some(part) = parts.last_mut() {
            if !token.is_empty() {
                part.push(token);
            }
        }
        if ends_part {
            parts.push(Vec::new());
        }
    }

    let mut candidates: Vec<Candidate> = Vec::new();
    for candidate in parts.iter().filter_map(|tokens| candidate_from(tokens)) {
        if !candidates.iter().any(|c| c.name.eq_ignore_ascii_case(&candidate.name)) {
            candidates.push(candidate);
        }
    }
    candidates
}

fn candidate_from(tokens: &[String]) -> Option<Candidate> {
    let ticker = tokens
        .iter()
        .find(|t| t.len() >= 2 && looks_like_ticker(t) && !is_stopword(t))
        .cloned();

    let is_name_token = |t: &String| is_capitalized(t) && !is_stopword(t) && !looks_like_ticker(t);
    let name: Vec<&str> = tokens
        .iter()
        .skip_while(|t| !is_name_token(*t))
        .take_while(|t| is_name_token(*t))
        .take(MAX_COMPANY_TOKENS)
        .map(String::as_str)
        .collect();

    match (name.is_empty(), ticker) {
        (false, ticker) => Some(Candidate {
            name: name.join(" "),
            ticker,
        }),
        (true, Some(ticker)) => Some(Candidate {
            name: ticker.clone(),
            ticker: Some(ticker),
        }),
        (true, None) => None,
    }
}

/// Strip surrounding punctuation and a trailing possessive
fn clean_token(raw: &str) -> String {
    let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '&');
    let token = token
        .strip_suffix("'s")
        .or_else(|| token.strip_suffix("’s"))
        .unwrap_or(token);
    token.trim_end_matches(|c: char| !c.is_alphanumeric()).to_string()
}

fn is_capitalized(token: &str) -> bool {
    token.chars().next().is_some_and(|c| c.is_uppercase())
}

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token.to_lowercase().as_str())
}
