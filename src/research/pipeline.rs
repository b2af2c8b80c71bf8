use super::coordinator::ResearchCoordinator;
use super::decomposer::Decomposer;
use super::fallback::FallbackResolver;
use super::search::WebResearcher;
use super::synthesizer::Synthesizer;
use super::verifier::Verifier;
use crate::api::TickerLookup;
use crate::error::ResearchError;
use crate::llm::TextGenerator;
use crate::models::{ResearchQuestion, ResearchReport, RunStage, SubTask};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Records the stages a run passes through; only ever moves forward
#[derive(Debug)]
struct StageTracker {
    run_id: Uuid,
    stages: Vec<RunStage>,
}

impl StageTracker {
    fn start(run_id: Uuid) -> Self {
        tracing::info!("▶️  Stage: {}", RunStage::Decomposing);
        Self {
            run_id,
            stages: vec![RunStage::Decomposing],
        }
    }

    fn current(&self) -> RunStage {
        self.stages.last().copied().unwrap_or(RunStage::Decomposing)
    }

    fn advance(&mut self) {
        if let Some(next) = self.current().next() {
            tracing::info!("▶️  Stage: {} (run {})", next, self.run_id);
            self.stages.push(next);
        }
    }
}

/// Decompose → research → synthesize → verify, once per question
pub struct ResearchPipeline {
    decomposer: Decomposer,
    coordinator: ResearchCoordinator,
    synthesizer: Synthesizer,
    verifier: Verifier,
    web: Option<WebResearcher>,
}

impl ResearchPipeline {
    pub fn new(
        decomposer: Decomposer,
        coordinator: ResearchCoordinator,
        synthesizer: Synthesizer,
        verifier: Verifier,
    ) -> Self {
        Self {
            decomposer,
            coordinator,
            synthesizer,
            verifier,
            web: None,
        }
    }

    /// Run planned web searches during the research stage
    pub fn with_web_research(mut self, web: WebResearcher) -> Self {
        self.web = Some(web);
        self
    }

    /// Wire every stage to one text generator, resolver and ticker lookup
    pub fn from_parts(
        generator: Arc<dyn TextGenerator>,
        resolver: Arc<FallbackResolver>,
        lookup: Arc<dyn TickerLookup>,
    ) -> Self {
        Self::new(
            Decomposer::new(generator.clone(), lookup.clone()),
            ResearchCoordinator::new(resolver, lookup),
            Synthesizer::new(generator.clone()),
            Verifier::new(generator),
        )
    }

    pub async fn decompose(&self, question: &ResearchQuestion, cancel: &CancellationToken) -> Vec<SubTask> {
        self.decomposer.decompose(question, cancel).await
    }

    /// Run the full pipeline.
    ///
    /// The only error is [`ResearchError::NoSubTasks`]; every other failure
    /// degrades into markers inside the returned report.
    pub async fn run(&self, question: &ResearchQuestion, cancel: &CancellationToken) -> Result<ResearchReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("research_run", %run_id);
        self.run_stages(run_id, question, cancel).instrument(span).await
    }

    /// Like [`run`](Self::run), cancelling all in-flight work once `deadline` elapses
    pub async fn run_with_deadline(
        &self,
        question: &ResearchQuestion,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<ResearchReport> {
        let scoped = cancel.child_token();
        let timer = scoped.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    tracing::warn!("⏱️  Research deadline of {:?} reached, cancelling in-flight work", deadline);
                    timer.cancel();
                }
                _ = timer.cancelled() => {}
            }
        });

        let result = self.run(question, &scoped).await;
        // Stops the timer task
        scoped.cancel();
        result
    }

    async fn web_context(
        &self,
        question: &ResearchQuestion,
        sub_tasks: &[SubTask],
        cancel: &CancellationToken,
    ) -> Option<String> {
        match &self.web {
            Some(web) => web.gather(question, sub_tasks, cancel).await,
            None => None,
        }
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        question: &ResearchQuestion,
        cancel: &CancellationToken,
    ) -> Result<ResearchReport> {
        tracing::info!("🚀 Research run started: {}", question.text());
        let mut tracker = StageTracker::start(run_id);

        let sub_tasks = self.decomposer.decompose(question, cancel).await;
        if sub_tasks.is_empty() {
            tracing::warn!("❌ No researchable sub-tasks in question");
            return Err(ResearchError::NoSubTasks(question.text().to_string()));
        }

        tracker.advance();
        let (results, web_context) = tokio::join!(
            self.coordinator.research(sub_tasks.clone(), cancel),
            self.web_context(question, &sub_tasks, cancel)
        );
        let question = match web_context {
            Some(context) => question.clone().with_context(context),
            None => question.clone(),
        };

        tracker.advance();
        let synthesis = self.synthesizer.synthesize(&question, results, cancel).await;

        tracker.advance();
        let verification = self.verifier.verify(&synthesis.markdown_report, cancel).await;

        tracker.advance();
        tracing::info!(
            "✅ Research run complete: {} compan{}, verification {}",
            synthesis.analysis.company_results.len(),
            if synthesis.analysis.company_results.len() == 1 { "y" } else { "ies" },
            if verification.passed { "passed" } else { "not passed" }
        );

        Ok(ResearchReport {
            run_id,
            short_summary: synthesis.short_summary,
            markdown_report: synthesis.markdown_report,
            follow_up_questions: synthesis.follow_up_questions,
            verification,
            sub_tasks,
            analysis: synthesis.analysis,
            stages: tracker.stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StaticTickerLookup;
    use crate::error::LlmError;
    use crate::llm::GenerationRequest;
    use async_trait::async_trait;

    struct Unavailable;

    #[async_trait]
    impl TextGenerator for Unavailable {
        fn model_name(&self) -> &str {
            "unavailable"
        }

        async fn generate(&self, _request: &GenerationRequest) -> std::result::Result<String, LlmError> {
            Err(LlmError::Request("offline".to_string()))
        }
    }

    struct Slow;

    #[async_trait]
    impl TextGenerator for Slow {
        fn model_name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _request: &GenerationRequest) -> std::result::Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(LlmError::Request("too slow".to_string()))
        }
    }

    fn pipeline(generator: Arc<dyn TextGenerator>) -> ResearchPipeline {
        ResearchPipeline::from_parts(
            generator,
            Arc::new(FallbackResolver::new()),
            Arc::new(StaticTickerLookup::new()),
        )
    }

    #[test]
    fn test_stage_tracker_moves_forward_only() {
        let mut tracker = StageTracker::start(Uuid::new_v4());
        for _ in 0..10 {
            tracker.advance();
        }
        assert_eq!(
            tracker.stages,
            vec![
                RunStage::Decomposing,
                RunStage::Researching,
                RunStage::Synthesizing,
                RunStage::Verifying,
                RunStage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_question_without_companies_is_rejected() {
        let result = pipeline(Arc::new(Unavailable))
            .run(&ResearchQuestion::new("what is going on?"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ResearchError::NoSubTasks(_))));
    }

    #[tokio::test]
    async fn test_degraded_run_still_delivers_report() {
        let report = pipeline(Arc::new(Unavailable))
            .run(&ResearchQuestion::new("Analyze Tesla's revenue growth"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stages.last(), Some(&RunStage::Done));
        assert!(!report.sub_tasks.is_empty());
        assert!(report.markdown_report.contains("TSLA"));
        assert!(!report.verification.passed);
        assert!(report.verification.notes.starts_with("Verification unavailable"));
        assert!((3..=5).contains(&report.follow_up_questions.len()));
    }

    #[tokio::test]
    async fn test_deadline_cancels_slow_generation() {
        let started = std::time::Instant::now();
        let report = pipeline(Arc::new(Slow))
            .run_with_deadline(
                &ResearchQuestion::new("Analyze Tesla's revenue growth"),
                Duration::from_millis(50),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.stages.last(), Some(&RunStage::Done));
        assert!(!report.verification.passed);
    }
}
