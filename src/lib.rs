// Core modules
pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod indicators;
pub mod llm;
pub mod models;
pub mod report;
pub mod research;

// Re-export commonly used types
pub use error::{LlmError, ResearchError, SourceError};
pub use models::*;
pub use research::ResearchPipeline;

// Error handling
pub type Result<T> = std::result::Result<T, ResearchError>;
