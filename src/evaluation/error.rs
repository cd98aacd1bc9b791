//! Evaluation core errors.
//!
//! Three layers, from innermost to caller-facing:
//! [`RuntimeError`] for a single send through the runtime context,
//! [`TaskFailure`] for the terminal reason a metric task gave up, and
//! [`EvaluationError`] for the few failures that abort a whole session.

use std::time::Duration;

use thiserror::Error;

use crate::llm::EvaluatorError;

use super::types::Metric;

/// Errors produced by a registered metric handler.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandlerError {
    /// The evaluator call failed.
    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),

    /// The evaluator answered but its text did not have the expected shape.
    #[error("unparseable evaluation: {0}")]
    Parse(String),
}

/// Errors surfaced by [`RuntimeContext`](super::runtime::RuntimeContext).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    /// The context has not been started or was shut down.
    #[error("runtime is not running")]
    NotRunning,

    /// An emergency reset is tearing the context down.
    #[error("runtime reset in progress")]
    Resetting,

    /// The context was reset or stopped while the request was in flight.
    #[error("runtime was reset while the request was in flight")]
    ResetDuringRequest,

    /// No handler is registered for the metric.
    #[error("no handler registered for {0}")]
    HandlerMissing(Metric),

    /// Handler construction or registration failed.
    #[error("runtime initialization failed: {0}")]
    Initialization(String),

    /// The handler itself failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Why a metric task ended without a result.
///
/// Never escapes the dispatcher: the aggregator turns it into a
/// Poor/0/Bronze placeholder.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskFailure {
    #[error("{metric} agent communication timeout after {attempts} attempt(s) (last budget {budget:?})")]
    CommunicationTimeout {
        metric: Metric,
        attempts: u32,
        budget: Duration,
    },

    #[error("failed to communicate with {metric} agent: {reason}")]
    CommunicationFailure {
        metric: Metric,
        reason: String,
        /// Whether the failure points at a stuck runtime or evaluator.
        systemic: bool,
    },

    #[error("failed to parse response from {metric} agent: {reason}")]
    ResultParse { metric: Metric, reason: String },
}

impl TaskFailure {
    /// Map a runtime send error for one attempt.
    pub(crate) fn from_runtime(metric: Metric, error: RuntimeError) -> Self {
        match error {
            RuntimeError::Handler(HandlerError::Parse(reason)) => {
                TaskFailure::ResultParse { metric, reason }
            }
            RuntimeError::Handler(HandlerError::Evaluator(EvaluatorError::Timeout(budget))) => {
                TaskFailure::CommunicationTimeout {
                    metric,
                    attempts: 1,
                    budget,
                }
            }
            // Failures caused by a reset are a consequence of recovery, not a
            // reason to trigger another one.
            RuntimeError::Resetting | RuntimeError::ResetDuringRequest => {
                TaskFailure::CommunicationFailure {
                    metric,
                    reason: error.to_string(),
                    systemic: false,
                }
            }
            other => TaskFailure::CommunicationFailure {
                metric,
                reason: other.to_string(),
                systemic: true,
            },
        }
    }

    /// Parse failures are terminal; communication failures may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TaskFailure::ResultParse { .. })
    }

    /// Whether an emergency runtime reset is warranted before retrying.
    pub fn is_systemic(&self) -> bool {
        match self {
            TaskFailure::CommunicationTimeout { .. } => true,
            TaskFailure::CommunicationFailure { systemic, .. } => *systemic,
            TaskFailure::ResultParse { .. } => false,
        }
    }

    pub(crate) fn with_attempts(self, total: u32) -> Self {
        match self {
            TaskFailure::CommunicationTimeout { metric, budget, .. } => {
                TaskFailure::CommunicationTimeout {
                    metric,
                    attempts: total,
                    budget,
                }
            }
            other => other,
        }
    }
}

/// Session-fatal errors returned to the caller of `evaluate`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvaluationError {
    /// Admission denied: the active-session cap is reached.
    #[error("Maximum concurrent evaluations ({max}) reached. Please try again later.")]
    CapacityExceeded { active: usize, max: usize },

    /// The session deadline passed with metric tasks still pending.
    #[error("evaluation {session_id} timed out after {timeout:?}; pending metrics: {pending:?}")]
    SessionTimeout {
        session_id: String,
        timeout: Duration,
        pending: Vec<Metric>,
    },

    /// The runtime context could not be started.
    #[error("runtime initialization failed: {0}")]
    RuntimeInitialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}
