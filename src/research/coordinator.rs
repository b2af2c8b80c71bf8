use super::fallback::FallbackResolver;
use crate::api::{CompanyTarget, TickerLookup};
use crate::models::{DataCategory, ResearchResult, SubTask};
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const NO_DATA_ERROR: &str = "Failed to retrieve any valid data from available sources";

/// Fans sub-tasks out as independent tasks and joins every one of them.
///
/// A failed or panicking sub-task becomes a `ResearchResult` carrying an
/// error string; siblings are never cancelled or affected.
#[derive(Clone)]
pub struct ResearchCoordinator {
    resolver: Arc<FallbackResolver>,
    lookup: Arc<dyn TickerLookup>,
    categories: Vec<DataCategory>,
}

impl ResearchCoordinator {
    pub fn new(resolver: Arc<FallbackResolver>, lookup: Arc<dyn TickerLookup>) -> Self {
        Self {
            resolver,
            lookup,
            categories: DataCategory::ALL.to_vec(),
        }
    }

    /// Restrict which categories are fetched per sub-task
    pub fn with_categories(mut self, categories: Vec<DataCategory>) -> Self {
        self.categories = categories;
        self
    }

    /// Results are index-aligned with `subtasks`
    pub async fn research(&self, subtasks: Vec<SubTask>, cancel: &CancellationToken) -> Vec<ResearchResult> {
        tracing::info!("🔎 Researching {} sub-task(s)", subtasks.len());

        let handles: Vec<_> = subtasks
            .iter()
            .cloned()
            .map(|subtask| {
                let coordinator = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { coordinator.research_one(subtask, &cancel).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(subtasks)
            .map(|(joined, subtask)| match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("Sub-task for {} aborted: {}", subtask.subject(), e);
                    ResearchResult::failed(subtask, format!("Research task aborted: {}", e))
                }
            })
            .collect()
    }

    /// Research one sub-task: resolve the ticker, then fetch every category concurrently
    pub async fn research_one(&self, subtask: SubTask, cancel: &CancellationToken) -> ResearchResult {
        let ticker = match subtask.ticker() {
            Some(ticker) => Some(ticker.to_uppercase()),
            None if subtask.company_name.trim().is_empty() => None,
            None => self.lookup.resolve(&subtask.company_name, cancel).await,
        };
        let Some(ticker) = ticker else {
            let error = format!("Could not resolve ticker for {}", subtask.subject());
            tracing::warn!("{}", error);
            return ResearchResult::failed(subtask, error);
        };

        let target = CompanyTarget::new(ticker.clone(), subtask.company_name.clone());
        let resolutions = join_all(
            self.categories
                .iter()
                .map(|category| self.resolver.resolve(*category, &target, cancel)),
        )
        .await;

        let mut result = ResearchResult::new(subtask, Some(ticker));
        for resolution in resolutions {
            result.attempts.extend(resolution.attempts);
            result.records.insert(resolution.record.category, resolution.record);
        }

        if result.has_data() {
            tracing::info!(
                "✅ {}: {} of {} categories populated",
                target.ticker,
                result.populated_categories().len(),
                self.categories.len()
            );
        } else {
            tracing::warn!("❌ {}: no category could be populated", target.ticker);
            result.records.clear();
            result.error = Some(NO_DATA_ERROR.to_string());
        }
        result
    }
}
