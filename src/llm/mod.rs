//! Evaluator seam.
//!
//! An [`Evaluator`] turns a system/user prompt pair into free-form judgment
//! text. Metric handlers depend only on this trait; the HTTP-backed
//! [`ChatEvaluator`] is wired in by the binary and tests substitute a
//! scripted double.

mod chat;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use chat::{ChatEvaluator, ChatEvaluatorConfig, Provider};

/// Model name prefixes routed to the Anthropic messages API.
pub const ANTHROPIC_PREFIXES: &[&str] = &["anthropic/", "claude-", "claude/"];

/// Failure of a single evaluator call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvaluatorError {
    /// No answer within the call's timeout.
    #[error("evaluator call timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure, non-2xx status or malformed response body.
    #[error("evaluator communication failed: {0}")]
    Communication(String),
}

/// Capability that produces a free-form evaluation for a prompt.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Invoke the model. Implementations must give up after `timeout`.
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<String, EvaluatorError>;
}

/// Whether `model` names an Anthropic model.
pub fn is_anthropic_model(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    ANTHROPIC_PREFIXES.iter().any(|p| lower.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anthropic_prefixes() {
        assert!(is_anthropic_model("claude-3-sonnet-20240229"));
        assert!(is_anthropic_model("anthropic/claude-3-haiku"));
        assert!(is_anthropic_model("Claude-3-opus"));
        assert!(!is_anthropic_model("gpt-4o-mini"));
    }
}
