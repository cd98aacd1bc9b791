//! # sme-eval
//!
//! Multi-metric evaluation of RAG responses. A submitted response is scored
//! on up to four metrics (Accuracy, Hallucination, Authoritativeness,
//! Usefulness), each by its own LLM-backed handler, and the per-metric
//! results are folded into one composite verdict.
//!
//! Metric tasks run concurrently under a session deadline, with per-attempt
//! timeouts, bounded retries, heartbeats and an emergency reset of the
//! shared handler runtime when a failure looks systemic.

pub mod config;
pub mod evaluation;
pub mod llm;
pub mod metrics;
pub mod server;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, Settings};
pub use evaluation::{
    Artifact, Badge, CompositeVerdict, EvaluationError, EvaluationService, Metric, MetricResult,
    Rating, ServiceOptions,
};
pub use llm::{ChatEvaluator, Evaluator, EvaluatorError};
pub use metrics::CriteriaSet;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
