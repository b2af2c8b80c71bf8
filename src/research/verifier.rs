use crate::llm::{generate_structured, GenerationRequest, TextGenerator};
use crate::models::VerificationResult;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const SYSTEM_PROMPT: &str = "You are a meticulous financial fact checker. Review the report for \
internal consistency, unsupported claims, and arithmetic errors. Respond with a JSON object only.";

#[derive(Debug, Deserialize)]
struct VerificationResponse {
    passed: bool,
    #[serde(default)]
    notes: String,
}

/// Advisory check of a finished report. Never withholds the report.
pub struct Verifier {
    generator: Arc<dyn TextGenerator>,
}

impl Verifier {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Submit the report text for checking; service failures become a failed verdict with notes
    pub async fn verify(&self, markdown_report: &str, cancel: &CancellationToken) -> VerificationResult {
        let prompt = format!(
            "Report:\n{}\n\nCheck the report. Return ONLY a JSON object with these fields:\n\
             - passed: true if the report is consistent and supported by its own data\n\
             - notes: short explanation of any issues found",
            markdown_report
        );
        let request = GenerationRequest::new("verification", SYSTEM_PROMPT, prompt);

        match generate_structured::<VerificationResponse>(self.generator.as_ref(), &request, cancel).await {
            Ok(verdict) => {
                tracing::info!("🔍 Verification {}", if verdict.passed { "passed" } else { "flagged issues" });
                VerificationResult {
                    passed: verdict.passed,
                    notes: verdict.notes.trim().to_string(),
                }
            }
            Err(e) => {
                tracing::warn!("Verification unavailable: {}", e);
                VerificationResult {
                    passed: false,
                    notes: format!("Verification unavailable: {}", e),
                }
            }
        }
    }
}
