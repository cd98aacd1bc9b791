//! Fan-out / fan-in of metric tasks for one session.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;

use crate::metrics::MetricPrompt;

use super::error::{EvaluationError, TaskFailure};
use super::runtime::RuntimeContext;
use super::session::{SessionGuard, SessionState};
use super::task::{MetricTask, RetryPolicy};
use super::types::{Metric, MetricResult};

/// Settled outcome per metric.
pub type Outcomes = BTreeMap<Metric, Result<MetricResult, TaskFailure>>;

/// Runs one [`MetricTask`] per selected metric under a session deadline.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    runtime: Arc<RuntimeContext>,
    policy: RetryPolicy,
    session_timeout: Duration,
}

impl Dispatcher {
    pub fn new(runtime: Arc<RuntimeContext>, policy: RetryPolicy, session_timeout: Duration) -> Self {
        Self {
            runtime,
            policy,
            session_timeout,
        }
    }

    /// Run every task to completion or until the session deadline.
    ///
    /// Tasks are polled together by this future. A failed task never
    /// cancels its siblings. On deadline the pending tasks are dropped, the
    /// session is marked failed and no partial outcome is returned.
    pub async fn run(
        &self,
        session: &SessionGuard,
        model: &str,
        prompts: Vec<(Metric, MetricPrompt)>,
    ) -> Result<Outcomes, EvaluationError> {
        let deadline = Instant::now() + self.session_timeout;
        let mut pending: BTreeSet<Metric> = prompts.iter().map(|(m, _)| *m).collect();

        let mut tasks: FuturesUnordered<_> = prompts
            .into_iter()
            .map(|(metric, prompt)| {
                MetricTask::new(
                    session.id(),
                    metric,
                    model,
                    prompt,
                    Arc::clone(&self.runtime),
                    self.policy,
                )
                .execute()
            })
            .collect();
        tracing::info!(
            session_id = session.id(),
            tasks = tasks.len(),
            timeout_ms = self.session_timeout.as_millis() as u64,
            "dispatched metric tasks"
        );

        let mut outcomes = Outcomes::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.next()).await {
                Ok(Some(report)) => {
                    pending.remove(&report.metric);
                    tracing::info!(
                        session_id = session.id(),
                        metric = %report.metric,
                        attempts = report.attempts,
                        ok = report.outcome.is_ok(),
                        remaining = pending.len(),
                        "metric task settled"
                    );
                    if let Ok(result) = &report.outcome {
                        session.record_result(result.clone());
                    }
                    outcomes.insert(report.metric, report.outcome);
                }
                Ok(None) => break,
                Err(_) => {
                    // Dropping the set cancels every pending attempt and heartbeat.
                    drop(tasks);
                    session.mark(SessionState::Failed);
                    let pending: Vec<Metric> = pending.into_iter().collect();
                    tracing::error!(
                        session_id = session.id(),
                        pending = ?pending,
                        "session timed out"
                    );
                    return Err(EvaluationError::SessionTimeout {
                        session_id: session.id().to_string(),
                        timeout: self.session_timeout,
                        pending,
                    });
                }
            }
        }
        Ok(outcomes)
    }
}
