//! Typed message contract between metric tasks and metric handlers.
//!
//! Both directions carry the attempt's correlation id. The enum wrapper
//! serializes with a `message_type` tag so the same field set can cross a
//! process boundary if handlers are ever hosted out of process.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{Badge, Metric, MetricResult, Rating};

/// Wire envelope for either direction of the exchange.
///
/// In-process handlers receive the inner messages directly; this form is
/// only needed once a handler is reached over a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
#[allow(dead_code)]
pub(crate) enum AgentMessage {
    EvaluationRequest(EvaluationRequestMessage),
    EvaluationResult(EvaluationResultMessage),
}

/// Task → handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequestMessage {
    /// Correlation id, unique per attempt.
    pub request_id: String,
    pub session_id: String,
    pub metric: Metric,
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    /// Budget of the attempt carrying this request.
    pub timeout_ms: u64,
}

impl EvaluationRequestMessage {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Handler → task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResultMessage {
    pub request_id: String,
    /// Name of the handler that produced the result, e.g. `AccuracyAgent`.
    pub agent_id: String,
    pub metric: Metric,
    pub rating: Rating,
    pub score: u8,
    pub badge: Badge,
    pub reasoning: String,
}

impl EvaluationResultMessage {
    pub fn from_result(
        request_id: impl Into<String>,
        agent_id: impl Into<String>,
        result: &MetricResult,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            agent_id: agent_id.into(),
            metric: result.metric(),
            rating: result.rating(),
            score: result.score(),
            badge: result.badge(),
            reasoning: result.reasoning().to_string(),
        }
    }

    /// Validate the reply against the request it answers and convert it.
    pub fn into_metric_result(
        self,
        request: &EvaluationRequestMessage,
    ) -> Result<MetricResult, String> {
        if self.request_id != request.request_id {
            return Err(format!(
                "correlation mismatch: expected {}, got {}",
                request.request_id, self.request_id
            ));
        }
        if self.metric != request.metric {
            return Err(format!(
                "metric mismatch: expected {}, got {}",
                request.metric, self.metric
            ));
        }
        if self.rating.score() != self.score || self.rating.badge() != self.badge {
            return Err(format!(
                "inconsistent result: rating {} with score {} and badge {}",
                self.rating, self.score, self.badge
            ));
        }
        Ok(MetricResult::new(self.metric, self.rating, self.reasoning))
    }
}
