//! Evaluator-backed metric handlers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::evaluation::{
    EvaluationRequestMessage, EvaluationResultMessage, HandlerError, HandlerFactory, Metric,
    MetricHandler, RuntimeError,
};
use crate::llm::{Evaluator, EvaluatorError};

use super::criteria::CriteriaSet;
use super::parser::parse_evaluation;

/// Handler that asks an [`Evaluator`] for a judgment and parses the reply.
pub struct LlmMetricHandler {
    metric: Metric,
    agent_id: String,
    evaluator: Arc<dyn Evaluator>,
    llm_timeout: Duration,
}

impl LlmMetricHandler {
    pub fn new(
        metric: Metric,
        agent_id: impl Into<String>,
        evaluator: Arc<dyn Evaluator>,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            metric,
            agent_id: agent_id.into(),
            evaluator,
            llm_timeout,
        }
    }
}

#[async_trait]
impl MetricHandler for LlmMetricHandler {
    fn metric(&self) -> Metric {
        self.metric
    }

    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn handle(
        &self,
        request: &EvaluationRequestMessage,
    ) -> Result<EvaluationResultMessage, HandlerError> {
        // Never outlive the attempt that carries the request.
        let timeout = self.llm_timeout.min(request.timeout());
        tracing::debug!(
            agent_id = %self.agent_id,
            correlation_id = %request.request_id,
            timeout_ms = timeout.as_millis() as u64,
            "invoking evaluator"
        );

        let call = self.evaluator.invoke(
            &request.system_prompt,
            &request.user_prompt,
            &request.model,
            timeout,
        );
        let text = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| EvaluatorError::Timeout(timeout))??;

        let result = parse_evaluation(request.metric, &text).map_err(|e| {
            tracing::warn!(
                agent_id = %self.agent_id,
                correlation_id = %request.request_id,
                error = %e,
                "unparseable evaluator response"
            );
            HandlerError::Parse(e.to_string())
        })?;

        Ok(EvaluationResultMessage::from_result(
            &request.request_id,
            &self.agent_id,
            &result,
        ))
    }
}

/// Factory that builds one [`LlmMetricHandler`] per metric.
pub fn handler_factory(
    evaluator: Arc<dyn Evaluator>,
    criteria: Arc<CriteriaSet>,
    llm_timeout: Duration,
) -> HandlerFactory {
    Arc::new(move || {
        Metric::ALL
            .into_iter()
            .map(|metric| {
                let agent_id = criteria
                    .get(metric)
                    .map(|c| c.agent_name.clone())
                    .ok_or_else(|| {
                        RuntimeError::Initialization(format!("no criteria for {metric}"))
                    })?;
                Ok(Arc::new(LlmMetricHandler::new(
                    metric,
                    agent_id,
                    Arc::clone(&evaluator),
                    llm_timeout,
                )) as Arc<dyn MetricHandler>)
            })
            .collect::<Result<Vec<_>, RuntimeError>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::Rating;
    use crate::metrics::prompt::MetricPrompt;
    use crate::testing::{sample_artifact, Behavior, ScriptedEvaluator};

    fn request(metric: Metric, timeout: Duration) -> EvaluationRequestMessage {
        let criteria = CriteriaSet::builtin();
        let prompt = MetricPrompt::render(criteria.get(metric).unwrap(), &sample_artifact());
        EvaluationRequestMessage {
            request_id: format!("eval_0123456789ab:{}:1", metric.key()),
            session_id: "eval_0123456789ab".into(),
            metric,
            system_prompt: prompt.system_prompt,
            user_prompt: prompt.user_prompt,
            model: "gpt-4o-mini".into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    fn handler(evaluator: ScriptedEvaluator, metric: Metric) -> LlmMetricHandler {
        LlmMetricHandler::new(
            metric,
            format!("{metric}Agent"),
            Arc::new(evaluator),
            Duration::from_secs(20),
        )
    }

    #[tokio::test]
    async fn test_handle_parses_reply() {
        let evaluator = ScriptedEvaluator::new().with(Metric::Accuracy, Behavior::Score(2));
        let h = handler(evaluator, Metric::Accuracy);
        let req = request(Metric::Accuracy, Duration::from_secs(25));

        let reply = h.handle(&req).await.unwrap();
        assert_eq!(reply.request_id, req.request_id);
        assert_eq!(reply.agent_id, "AccuracyAgent");
        assert_eq!(reply.rating, Rating::Good);
        assert_eq!(reply.score, 2);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_parse_error() {
        let evaluator = ScriptedEvaluator::new()
            .with(Metric::Usefulness, Behavior::Text("no idea".into()));
        let h = handler(evaluator, Metric::Usefulness);
        let err = h
            .handle(&request(Metric::Usefulness, Duration::from_secs(25)))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Parse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounded_by_request_budget() {
        let evaluator = ScriptedEvaluator::new().with(Metric::Accuracy, Behavior::Hang);
        let h = handler(evaluator, Metric::Accuracy);
        let err = h
            .handle(&request(Metric::Accuracy, Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HandlerError::Evaluator(EvaluatorError::Timeout(Duration::from_secs(5)))
        );
    }

    #[test]
    fn test_factory_builds_handler_per_metric() {
        let factory = handler_factory(
            Arc::new(ScriptedEvaluator::new()),
            Arc::new(CriteriaSet::builtin()),
            Duration::from_secs(20),
        );
        let handlers = factory().unwrap();
        let metrics: Vec<Metric> = handlers.iter().map(|h| h.metric()).collect();
        assert_eq!(metrics, Metric::ALL.to_vec());
        assert_eq!(handlers[2].agent_id(), "AuthoritativenessAgent");
    }
}
