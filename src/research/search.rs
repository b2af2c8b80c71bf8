//! Web search stage.
//!
//! The text service plans a handful of searches for the question; each is
//! run concurrently against the web search source and the findings become
//! the synthesizer's web context. Runs alongside the per-company research.

use crate::api::{CategoryOutcome, WebSearch};
use crate::llm::{generate_structured, GenerationRequest, TextGenerator};
use crate::models::{CategoryData, NewsData, ResearchQuestion, SubTask};
use futures::future::join_all;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const MAX_SEARCHES: usize = 5;
const MAX_RESULTS_PER_SEARCH: usize = 3;

const SYSTEM_PROMPT: &str = "You are a financial research assistant. Given a question, plan a \
small set of web searches that would best answer it: recent news, analyst opinions, market \
sentiment and industry context. Respond with a JSON object only, no markdown formatting.";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchItem {
    pub query: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct SearchPlan {
    #[serde(default)]
    searches: Vec<SearchItem>,
}

pub struct WebResearcher {
    generator: Arc<dyn TextGenerator>,
    search: Arc<dyn WebSearch>,
}

impl WebResearcher {
    pub fn new(generator: Arc<dyn TextGenerator>, search: Arc<dyn WebSearch>) -> Self {
        Self { generator, search }
    }

    /// Web context for the synthesizer.
    ///
    /// `None` when the caller already supplied context or nothing was found.
    pub async fn gather(
        &self,
        question: &ResearchQuestion,
        sub_tasks: &[SubTask],
        cancel: &CancellationToken,
    ) -> Option<String> {
        if question.context().is_some() {
            tracing::debug!("Question carries its own web context, skipping web search");
            return None;
        }

        let plan = self.plan(question, sub_tasks, cancel).await;
        let findings = self.perform(&plan, cancel).await;
        if findings.is_empty() {
            return None;
        }
        Some(findings.join("\n\n"))
    }

    /// Searches proposed by the text service, or one per company when it fails
    pub async fn plan(
        &self,
        question: &ResearchQuestion,
        sub_tasks: &[SubTask],
        cancel: &CancellationToken,
    ) -> Vec<SearchItem> {
        let request = GenerationRequest::new("search_plan", SYSTEM_PROMPT, build_prompt(question));

        let proposed = match generate_structured::<SearchPlan>(self.generator.as_ref(), &request, cancel).await {
            Ok(plan) => normalize_plan(plan.searches),
            Err(e) => {
                tracing::warn!("Search planning failed, searching per company: {}", e);
                Vec::new()
            }
        };

        let plan = if proposed.is_empty() {
            default_plan(sub_tasks)
        } else {
            proposed
        };
        tracing::info!("🔎 Will perform {} web search(es)", plan.len());
        plan
    }

    /// Run every search concurrently; failed or empty searches are dropped
    pub async fn perform(&self, plan: &[SearchItem], cancel: &CancellationToken) -> Vec<String> {
        let searches = plan.iter().map(|item| async move {
            match self.search.search(&item.query, cancel).await {
                CategoryOutcome::Found(CategoryData::News(news)) => Some(summarize(item, &news)),
                CategoryOutcome::Found(_) | CategoryOutcome::Empty => {
                    tracing::debug!("Web search '{}' found nothing", item.query);
                    None
                }
                CategoryOutcome::Failed(reason) => {
                    tracing::warn!("Web search '{}' failed: {}", item.query, reason);
                    None
                }
            }
        });

        let findings: Vec<String> = join_all(searches).await.into_iter().flatten().collect();
        tracing::info!("🔎 Web search complete: {}/{} returned results", findings.len(), plan.len());
        findings
    }
}

fn build_prompt(question: &ResearchQuestion) -> String {
    format!(
        "Question: {}\n\n\
         Return ONLY a JSON object of this shape, with at most {} searches:\n\
         {{\"searches\": [{{\"query\": \"search terms\", \"reason\": \"why this search helps\"}}]}}",
        question.text(),
        MAX_SEARCHES
    )
}

/// Trimmed, de-duplicated by query, capped at [`MAX_SEARCHES`]
fn normalize_plan(items: Vec<SearchItem>) -> Vec<SearchItem> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .map(|item| SearchItem {
            query: item.query.trim().to_string(),
            reason: item.reason.trim().to_string(),
        })
        .filter(|item| !item.query.is_empty() && seen.insert(item.query.to_lowercase()))
        .take(MAX_SEARCHES)
        .collect()
}

fn default_plan(sub_tasks: &[SubTask]) -> Vec<SearchItem> {
    let items = sub_tasks
        .iter()
        .map(|task| SearchItem {
            query: format!("{} {} analyst outlook", task.subject(), task.metric).trim().to_string(),
            reason: format!("Recent news and analyst views on {}", task.subject()),
        })
        .collect();
    normalize_plan(items)
}

fn summarize(item: &SearchItem, news: &NewsData) -> String {
    let mut out = format!("Search: {}", item.query);
    if !item.reason.is_empty() {
        let _ = write!(out, " ({})", item.reason);
    }
    if let Some(answer) = &news.answer {
        let _ = write!(out, "\n{}", answer);
    }
    for article in news.articles.iter().take(MAX_RESULTS_PER_SEARCH) {
        match &article.summary {
            Some(summary) => {
                let _ = write!(out, "\n- {}: {}", article.title, summary);
            }
            None => {
                let _ = write!(out, "\n- {}", article.title);
            }
        }
    }
    out
}
