//! Test doubles shared across unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::evaluation::{Artifact, Metric, Rating};
use crate::llm::{Evaluator, EvaluatorError};

/// How the scripted evaluator answers for one metric.
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    /// Well-formed reply with this score, immediately.
    Score(u8),
    /// Well-formed reply with this score after a delay.
    Delayed(Duration, u8),
    /// Never answers.
    Hang,
    /// Communication failure on every call.
    Fail(String),
    /// Communication failure for the first `n` calls, then a score.
    FailTimes(u32, u8),
    /// Verbatim text.
    Text(String),
}

/// Evaluator whose answers are scripted per metric. Unscripted metrics
/// answer `Score(3)`.
#[derive(Debug, Default)]
pub(crate) struct ScriptedEvaluator {
    behaviors: HashMap<Metric, Behavior>,
    calls: Mutex<HashMap<Metric, u32>>,
}

impl ScriptedEvaluator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, metric: Metric, behavior: Behavior) -> Self {
        self.behaviors.insert(metric, behavior);
        self
    }

    pub(crate) fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Number of evaluator calls made for `metric`.
    pub(crate) fn calls(&self, metric: Metric) -> u32 {
        self.calls.lock().get(&metric).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn invoke(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        _model: &str,
        _timeout: Duration,
    ) -> Result<String, EvaluatorError> {
        let metric = prompt_metric(user_prompt)
            .ok_or_else(|| EvaluatorError::Communication("unrecognized prompt".into()))?;
        let call = {
            let mut calls = self.calls.lock();
            let n = calls.entry(metric).or_insert(0);
            *n += 1;
            *n
        };

        match self.behaviors.get(&metric).cloned().unwrap_or(Behavior::Score(3)) {
            Behavior::Score(score) => Ok(reply(metric, score)),
            Behavior::Delayed(delay, score) => {
                tokio::time::sleep(delay).await;
                Ok(reply(metric, score))
            }
            Behavior::Hang => std::future::pending().await,
            Behavior::Fail(reason) => Err(EvaluatorError::Communication(reason)),
            Behavior::FailTimes(n, _) if call <= n => Err(EvaluatorError::Communication(
                format!("scripted failure {call}/{n}"),
            )),
            Behavior::FailTimes(_, score) => Ok(reply(metric, score)),
            Behavior::Text(text) => Ok(text),
        }
    }
}

/// Metric a rendered user prompt asks about.
pub(crate) fn prompt_metric(user_prompt: &str) -> Option<Metric> {
    Metric::ALL
        .into_iter()
        .find(|m| user_prompt.contains(&format!("Assess the {m} of")))
}

/// Well-formed line-format reply.
pub(crate) fn reply(metric: Metric, score: u8) -> String {
    let rating = Rating::from_score(i64::from(score)).unwrap_or(Rating::Poor);
    format!(
        "RATING: {rating}\nSCORE: {score}\nREASONING: The {metric} of the response was checked against every context chunk.",
    )
}

pub(crate) fn sample_artifact() -> Artifact {
    Artifact {
        user_query: "What is the statute of limitations for breach of a written contract in California?".into(),
        ai_response: "Four years under Code of Civil Procedure section 337.".into(),
        context_chunks: vec!["CCP 337: within four years, an action upon any contract in writing.".into()],
        model: "gpt-4o-mini".into(),
    }
}
