//! Metric task: one retry-capable evaluation of a single metric.
//!
//! ```text
//! Pending → Attempting(n) ─┬─▶ Succeeded
//!                          ├─▶ Retrying(n) → Attempting(n+1)
//!                          └─▶ Failed
//! ```
//!
//! Each attempt races the runtime send (bounded by the attempt budget)
//! against a heartbeat that only logs. A task never returns an error; its
//! terminal outcome is carried in the [`TaskReport`].

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::metrics::MetricPrompt;

use super::error::TaskFailure;
use super::messages::EvaluationRequestMessage;
use super::runtime::RuntimeContext;
use super::types::{Metric, MetricResult};

/// Budget cap for attempts after the first.
const RETRY_TIMEOUT_CAP: Duration = Duration::from_secs(30);
/// Upper bound on the heartbeat period.
const HEARTBEAT_CAP: Duration = Duration::from_secs(10);

// ============================================================================
// RetryPolicy
// ============================================================================

/// Attempt budgets, backoff and recovery behaviour of metric tasks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Budget of the first attempt.
    pub base_timeout: Duration,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    /// Floor for the budget of retries.
    pub min_attempt_timeout: Duration,
    /// Trigger an emergency reset before retrying a systemic failure.
    pub reset_on_failure: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(25),
            retry_attempts: 1,
            retry_delay: Duration::from_millis(500),
            min_attempt_timeout: Duration::from_secs(5),
            reset_on_failure: true,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    /// Budget of the 1-based `attempt`.
    pub fn attempt_budget(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            self.base_timeout
        } else {
            (self.base_timeout / 2)
                .min(RETRY_TIMEOUT_CAP)
                .max(self.min_attempt_timeout)
        }
    }

    /// Pause before the next attempt, linear in attempts made so far.
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        self.retry_delay.saturating_mul(attempts_made)
    }

    pub fn heartbeat_interval(budget: Duration) -> Duration {
        (budget / 4).min(HEARTBEAT_CAP).max(Duration::from_millis(1))
    }
}

// ============================================================================
// MetricTask
// ============================================================================

/// Execution state of a [`MetricTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "attempt", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Attempting(u32),
    Retrying(u32),
    Succeeded,
    Failed,
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub metric: Metric,
    pub attempts: u32,
    pub outcome: Result<MetricResult, TaskFailure>,
}

/// Evaluates one metric through the shared runtime context.
#[derive(Debug)]
pub struct MetricTask {
    session_id: String,
    metric: Metric,
    model: String,
    prompt: MetricPrompt,
    runtime: Arc<RuntimeContext>,
    policy: RetryPolicy,
    state: TaskState,
}

impl MetricTask {
    pub fn new(
        session_id: impl Into<String>,
        metric: Metric,
        model: impl Into<String>,
        prompt: MetricPrompt,
        runtime: Arc<RuntimeContext>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            metric,
            model: model.into(),
            prompt,
            runtime,
            policy,
            state: TaskState::Pending,
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Run to a terminal state.
    pub async fn execute(mut self) -> TaskReport {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.transition(TaskState::Attempting(attempt));
            let budget = self.policy.attempt_budget(attempt);

            let failure = match self.attempt(attempt, budget).await {
                Ok(result) => {
                    self.transition(TaskState::Succeeded);
                    return self.report(attempt, Ok(result));
                }
                Err(failure) => failure,
            };

            if !failure.is_retryable() || attempt >= max_attempts {
                tracing::warn!(
                    session_id = %self.session_id,
                    metric = %self.metric,
                    attempts = attempt,
                    error = %failure,
                    "metric task failed"
                );
                self.transition(TaskState::Failed);
                return self.report(attempt, Err(failure.with_attempts(attempt)));
            }

            self.transition(TaskState::Retrying(attempt));
            tracing::warn!(
                session_id = %self.session_id,
                metric = %self.metric,
                attempt,
                systemic = failure.is_systemic(),
                error = %failure,
                "attempt failed; retrying"
            );

            if self.policy.reset_on_failure && failure.is_systemic() {
                if let Err(e) = self.runtime.emergency_reset().await {
                    tracing::error!(metric = %self.metric, error = %e, "emergency reset failed");
                }
            }
            tokio::time::sleep(self.policy.backoff(attempt)).await;

            // Waits out a reset started by a sibling task.
            if let Err(e) = self.runtime.ensure_started().await {
                tracing::error!(metric = %self.metric, error = %e, "runtime unavailable for retry");
            }
        }
    }

    async fn attempt(&self, attempt: u32, budget: Duration) -> Result<MetricResult, TaskFailure> {
        let request = EvaluationRequestMessage {
            request_id: format!("{}:{}:{}", self.session_id, self.metric.key(), attempt),
            session_id: self.session_id.clone(),
            metric: self.metric,
            system_prompt: self.prompt.system_prompt.clone(),
            user_prompt: self.prompt.user_prompt.clone(),
            model: self.model.clone(),
            timeout_ms: budget.as_millis() as u64,
        };
        tracing::debug!(
            session_id = %self.session_id,
            metric = %self.metric,
            attempt,
            correlation_id = %request.request_id,
            budget_ms = budget.as_millis() as u64,
            "attempt started"
        );

        let started = Instant::now();
        let send = tokio::time::timeout(budget, self.runtime.send(request.clone()));
        let sent = tokio::select! {
            never = heartbeat(&self.session_id, self.metric, attempt, budget) => match never {},
            sent = send => sent,
        };

        let outcome = match sent {
            Err(_elapsed) => Err(TaskFailure::CommunicationTimeout {
                metric: self.metric,
                attempts: attempt,
                budget,
            }),
            Ok(Err(e)) => Err(TaskFailure::from_runtime(self.metric, e)),
            Ok(Ok(reply)) => reply
                .into_metric_result(&request)
                .map_err(|reason| TaskFailure::ResultParse {
                    metric: self.metric,
                    reason,
                }),
        };
        tracing::debug!(
            session_id = %self.session_id,
            metric = %self.metric,
            attempt,
            correlation_id = %request.request_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "attempt settled"
        );
        outcome
    }

    fn transition(&mut self, next: TaskState) {
        tracing::trace!(metric = %self.metric, from = ?self.state, to = ?next, "task transition");
        self.state = next;
    }

    fn report(&self, attempts: u32, outcome: Result<MetricResult, TaskFailure>) -> TaskReport {
        TaskReport {
            metric: self.metric,
            attempts,
            outcome,
        }
    }
}

/// Logs progress of an attempt until dropped.
async fn heartbeat(session_id: &str, metric: Metric, attempt: u32, budget: Duration) -> Infallible {
    let period = RetryPolicy::heartbeat_interval(budget);
    let started = Instant::now();
    let mut ticks = tokio::time::interval_at(started + period, period);
    loop {
        ticks.tick().await;
        tracing::debug!(
            session_id,
            %metric,
            attempt,
            elapsed_ms = started.elapsed().as_millis() as u64,
            budget_ms = budget.as_millis() as u64,
            "metric task heartbeat"
        );
    }
}
