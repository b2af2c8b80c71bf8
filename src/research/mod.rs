//! Research orchestration core.
//!
//! `Decomposer` turns a question into sub-tasks, `ResearchCoordinator` fans
//! them out over the `FallbackResolver` chains, and `Synthesizer` and
//! `Verifier` turn the merged results into a report. `WebResearcher` plans
//! and runs web searches alongside the per-company research.
//! `ResearchPipeline` drives the stages strictly forward.

pub mod coordinator;
pub mod decomposer;
pub mod fallback;
pub mod pipeline;
pub mod search;
pub mod synthesizer;
pub mod verifier;

pub use coordinator::ResearchCoordinator;
pub use decomposer::Decomposer;
pub use fallback::{FallbackResolver, Resolution};
pub use pipeline::ResearchPipeline;
pub use search::{SearchItem, WebResearcher};
pub use synthesizer::{Synthesis, Synthesizer};
pub use verifier::Verifier;
