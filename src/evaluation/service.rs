//! Evaluation service: the request, status and health surfaces of the core.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::llm::Evaluator;
use crate::metrics::{handler_factory, CriteriaSet, MetricPrompt};

use super::admission::AdmissionController;
use super::aggregator::aggregate;
use super::dispatcher::Dispatcher;
use super::error::EvaluationError;
use super::runtime::{HandlerFactory, RuntimeContext, RuntimeOptions, RuntimeSnapshot};
use super::session::{SessionManager, SessionState, SessionStatus};
use super::task::RetryPolicy;
use super::types::{Artifact, CompositeVerdict, Metric};

/// Tunables of the evaluation core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceOptions {
    pub max_concurrent_evaluations: usize,
    /// Deadline for a whole session.
    pub evaluation_timeout: Duration,
    /// Upper bound for a single evaluator call.
    pub llm_request_timeout: Duration,
    pub retry: RetryPolicy,
    pub runtime: RuntimeOptions,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            max_concurrent_evaluations: 5,
            evaluation_timeout: Duration::from_secs(300),
            llm_request_timeout: Duration::from_secs(20),
            retry: RetryPolicy::default(),
            runtime: RuntimeOptions::default(),
        }
    }
}

/// Health and introspection report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub active_evaluations: usize,
    pub max_concurrent_evaluations: usize,
    pub evaluation_timeout: f64,
    pub agent_communication_timeout: f64,
    pub llm_request_timeout: f64,
    pub retry_attempts: u32,
    pub runtime: RuntimeSnapshot,
}

/// Orchestrates admission, dispatch and aggregation of evaluations.
#[derive(Debug)]
pub struct EvaluationService {
    sessions: Arc<SessionManager>,
    runtime: Arc<RuntimeContext>,
    dispatcher: Dispatcher,
    criteria: Arc<CriteriaSet>,
    options: ServiceOptions,
}

impl EvaluationService {
    /// Service whose handlers call `evaluator`.
    pub fn new(
        options: ServiceOptions,
        evaluator: Arc<dyn Evaluator>,
        criteria: Arc<CriteriaSet>,
    ) -> Self {
        let factory = handler_factory(evaluator, Arc::clone(&criteria), options.llm_request_timeout);
        Self::with_factory(options, factory, criteria)
    }

    /// Service with a custom handler factory.
    pub fn with_factory(
        options: ServiceOptions,
        factory: HandlerFactory,
        criteria: Arc<CriteriaSet>,
    ) -> Self {
        let runtime = Arc::new(RuntimeContext::new(factory, options.runtime));
        let dispatcher = Dispatcher::new(
            Arc::clone(&runtime),
            options.retry,
            options.evaluation_timeout,
        );
        Self {
            sessions: Arc::new(SessionManager::new(AdmissionController::new(
                options.max_concurrent_evaluations,
            ))),
            runtime,
            dispatcher,
            criteria,
            options,
        }
    }

    /// Start the runtime context ahead of the first request.
    pub async fn start(&self) -> Result<(), EvaluationError> {
        self.runtime
            .ensure_started()
            .await
            .map_err(|e| EvaluationError::RuntimeInitialization(e.to_string()))
    }

    /// Evaluate `artifact` on `metrics`.
    ///
    /// `metrics` must be non-empty and free of duplicates. The session is
    /// closed however this call ends, including when its future is dropped.
    pub async fn evaluate(
        &self,
        metrics: &[Metric],
        artifact: Artifact,
    ) -> Result<CompositeVerdict, EvaluationError> {
        if metrics.is_empty() {
            return Err(EvaluationError::Internal(
                "at least one metric must be selected".into(),
            ));
        }

        let session = self.sessions.open_guarded(metrics)?;
        let started = Instant::now();
        let fail = |e: EvaluationError| {
            session.mark(SessionState::Failed);
            e
        };

        self.runtime.ensure_started().await.map_err(|e| {
            tracing::error!(session_id = session.id(), error = %e, "runtime failed to start");
            fail(EvaluationError::RuntimeInitialization(e.to_string()))
        })?;

        let prompts = metrics
            .iter()
            .map(|&metric| {
                self.criteria
                    .get(metric)
                    .map(|criteria| (metric, MetricPrompt::render(criteria, &artifact)))
                    .ok_or_else(|| EvaluationError::Internal(format!("no criteria for {metric}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;

        let outcomes = self.dispatcher.run(&session, &artifact.model, prompts).await?;
        let verdict = aggregate(metrics, outcomes, session.id(), started.elapsed());
        session.mark(SessionState::Completed);
        Ok(verdict)
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.sessions.status(session_id)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy",
            active_evaluations: self.sessions.active_count(),
            max_concurrent_evaluations: self.sessions.max_concurrent(),
            evaluation_timeout: self.options.evaluation_timeout.as_secs_f64(),
            agent_communication_timeout: self.options.retry.base_timeout.as_secs_f64(),
            llm_request_timeout: self.options.llm_request_timeout.as_secs_f64(),
            retry_attempts: self.options.retry.retry_attempts,
            runtime: self.runtime.snapshot(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.active_count()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.sessions.active_ids()
    }

    pub fn criteria(&self) -> &CriteriaSet {
        &self.criteria
    }

    pub fn runtime(&self) -> &Arc<RuntimeContext> {
        &self.runtime
    }

    /// Stop the runtime context.
    pub async fn shutdown(&self) {
        tracing::info!(active = self.sessions.active_count(), "shutting down evaluation service");
        self.runtime.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::error::RuntimeError;
    use crate::evaluation::runtime::Lifecycle;
    use crate::evaluation::types::{Badge, Rating};
    use crate::testing::{sample_artifact, Behavior, ScriptedEvaluator};

    fn service(evaluator: &Arc<ScriptedEvaluator>, options: ServiceOptions) -> Arc<EvaluationService> {
        Arc::new(EvaluationService::new(
            options,
            Arc::clone(evaluator) as Arc<dyn Evaluator>,
            Arc::new(CriteriaSet::builtin()),
        ))
    }

    fn total_calls(evaluator: &ScriptedEvaluator) -> u32 {
        Metric::ALL.iter().map(|m| evaluator.calls(*m)).sum()
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_metrics_great_platinum() {
        let evaluator = ScriptedEvaluator::new()
            .with(Metric::Accuracy, Behavior::Score(3))
            .with(Metric::Hallucination, Behavior::Score(3))
            .with(Metric::Authoritativeness, Behavior::Score(2))
            .with(Metric::Usefulness, Behavior::Score(3))
            .into_shared();
        let svc = service(&evaluator, ServiceOptions::default());

        let verdict = svc.evaluate(&Metric::ALL, sample_artifact()).await.unwrap();

        assert_eq!(verdict.overall.overall_score, 2.8);
        assert_eq!(verdict.overall.overall_rating, Rating::Great);
        assert_eq!(verdict.overall.overall_badge, Badge::Platinum);
        assert_eq!(verdict.authoritativeness.as_ref().unwrap().rating(), Rating::Good);
        assert!(verdict.evaluation_id.starts_with("eval_"));
        assert_eq!(svc.active_count(), 0);
        assert!(svc.status(&verdict.evaluation_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_metric_degrades_to_placeholder() {
        let evaluator = ScriptedEvaluator::new()
            .with(Metric::Accuracy, Behavior::Score(3))
            .with(Metric::Usefulness, Behavior::Hang)
            .into_shared();
        let svc = service(&evaluator, ServiceOptions::default());

        let verdict = svc
            .evaluate(&[Metric::Accuracy, Metric::Usefulness], sample_artifact())
            .await
            .unwrap();

        let usefulness = verdict.usefulness.as_ref().unwrap();
        assert_eq!(usefulness.rating(), Rating::Poor);
        assert_eq!(usefulness.score(), 0);
        assert_eq!(usefulness.badge(), Badge::Bronze);
        assert_eq!(verdict.overall.overall_score, 1.5);
        assert_eq!(verdict.overall.overall_rating, Rating::Fair);
        assert_eq!(verdict.overall.overall_badge, Badge::Silver);
        assert!(verdict.hallucination.is_none());
        assert!(evaluator.calls(Metric::Usefulness) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_exceeded_dispatches_nothing() {
        let evaluator = ScriptedEvaluator::new()
            .with(Metric::Accuracy, Behavior::Delayed(Duration::from_secs(15), 3))
            .into_shared();
        let svc = service(&evaluator, ServiceOptions::default());

        let mut running = Vec::new();
        for _ in 0..5 {
            let svc = Arc::clone(&svc);
            running.push(tokio::spawn(async move {
                svc.evaluate(&[Metric::Accuracy], sample_artifact()).await
            }));
        }
        while svc.active_count() < 5 {
            tokio::task::yield_now().await;
        }

        let calls_before = total_calls(&evaluator);
        let err = svc
            .evaluate(&[Metric::Accuracy], sample_artifact())
            .await
            .unwrap_err();
        assert_eq!(err, EvaluationError::CapacityExceeded { active: 5, max: 5 });
        assert_eq!(total_calls(&evaluator), calls_before);

        for handle in running {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(svc.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_deadline_fails_whole_evaluation() {
        let evaluator = ScriptedEvaluator::new()
            .with(Metric::Authoritativeness, Behavior::Delayed(Duration::from_secs(15), 3))
            .into_shared();
        let svc = service(
            &evaluator,
            ServiceOptions {
                evaluation_timeout: Duration::from_secs(10),
                ..ServiceOptions::default()
            },
        );

        let err = svc.evaluate(&Metric::ALL, sample_artifact()).await.unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::SessionTimeout { ref pending, .. } if pending == &vec![Metric::Authoritativeness]
        ));
        assert_eq!(svc.active_count(), 0);
        assert_eq!(svc.runtime().in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_after_emergency_reset() {
        let evaluator = ScriptedEvaluator::new().into_shared();
        let svc = service(&evaluator, ServiceOptions::default());

        svc.evaluate(&[Metric::Hallucination], sample_artifact()).await.unwrap();
        svc.runtime().emergency_reset().await.unwrap();
        assert_eq!(svc.runtime().generation(), 2);

        let verdict = svc.evaluate(&Metric::ALL, sample_artifact()).await.unwrap();
        assert_eq!(verdict.overall.overall_rating, Rating::Great);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_initialization_failure() {
        let factory: HandlerFactory =
            Arc::new(|| Err(RuntimeError::Initialization("evaluator unavailable".into())));
        let svc = EvaluationService::with_factory(
            ServiceOptions::default(),
            factory,
            Arc::new(CriteriaSet::builtin()),
        );

        let err = svc.evaluate(&[Metric::Accuracy], sample_artifact()).await.unwrap_err();
        assert!(matches!(err, EvaluationError::RuntimeInitialization(_)));
        assert_eq!(svc.active_count(), 0);
        assert_eq!(svc.health().runtime.lifecycle, Lifecycle::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_closes_session() {
        let evaluator = ScriptedEvaluator::new()
            .with(Metric::Accuracy, Behavior::Hang)
            .into_shared();
        let svc = service(&evaluator, ServiceOptions::default());

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            svc.evaluate(&[Metric::Accuracy], sample_artifact()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(svc.active_count(), 0);
        assert_eq!(svc.runtime().in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_metric_set_is_rejected() {
        let evaluator = ScriptedEvaluator::new().into_shared();
        let svc = service(&evaluator, ServiceOptions::default());
        assert!(matches!(
            svc.evaluate(&[], sample_artifact()).await,
            Err(EvaluationError::Internal(_))
        ));
        assert_eq!(total_calls(&evaluator), 0);
    }

    #[tokio::test]
    async fn test_health_and_shutdown() {
        let evaluator = ScriptedEvaluator::new().into_shared();
        let svc = service(&evaluator, ServiceOptions::default());
        svc.start().await.unwrap();

        let health = svc.health();
        assert_eq!(health.max_concurrent_evaluations, 5);
        assert_eq!(health.evaluation_timeout, 300.0);
        assert_eq!(health.agent_communication_timeout, 25.0);
        assert_eq!(health.runtime.lifecycle, Lifecycle::Running);
        assert_eq!(health.runtime.registered_metrics, Metric::ALL.to_vec());

        svc.shutdown().await;
        assert_eq!(svc.health().runtime.lifecycle, Lifecycle::Stopped);
    }
}
