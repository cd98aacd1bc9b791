//! Request body of `POST /api/v1/evaluate` and its validation.

use serde::{Deserialize, Serialize};

use crate::evaluation::{Artifact, Metric};

/// A file attached to the request. Logged, not evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
}

/// Evaluation request as submitted by clients.
///
/// `eval_metrices` keeps the field name existing clients send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    #[serde(default)]
    pub model: Vec<String>,
    #[serde(default = "all_metric_names")]
    pub eval_metrices: Vec<String>,
    pub user_query: String,
    pub ai_response: String,
    #[serde(default)]
    pub chunk_1: String,
    #[serde(default)]
    pub chunk_2: String,
    #[serde(default)]
    pub chunk_3: String,
    #[serde(default)]
    pub chunk_4: String,
    #[serde(default)]
    pub chunk_5: String,
    #[serde(default)]
    pub uploaded_file: Option<UploadedFile>,
}

fn all_metric_names() -> Vec<String> {
    Metric::ALL.iter().map(|m| m.as_str().to_string()).collect()
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    /// Deduplicated, in submission order.
    pub metrics: Vec<Metric>,
    pub artifact: Artifact,
    /// Whether duplicate metric names were dropped.
    pub deduplicated: bool,
}

impl EvaluationRequest {
    /// Context chunks that carry text.
    pub fn context_chunks(&self) -> Vec<String> {
        [
            &self.chunk_1,
            &self.chunk_2,
            &self.chunk_3,
            &self.chunk_4,
            &self.chunk_5,
        ]
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .cloned()
        .collect()
    }

    /// Check the request and turn it into metrics plus artifact.
    ///
    /// The error is the message returned with a 400.
    pub fn validate(self, default_model: &str) -> Result<ValidatedRequest, String> {
        if self.user_query.trim().is_empty() {
            return Err("User query cannot be empty".into());
        }
        if self.ai_response.trim().is_empty() {
            return Err("AI response cannot be empty".into());
        }
        if self.eval_metrices.is_empty() {
            return Err("At least one evaluation metric must be selected".into());
        }

        let mut metrics = Vec::with_capacity(self.eval_metrices.len());
        let mut invalid = Vec::new();
        for name in &self.eval_metrices {
            match name.parse::<Metric>() {
                Ok(metric) if !metrics.contains(&metric) => metrics.push(metric),
                Ok(_) => {}
                Err(_) => invalid.push(name.clone()),
            }
        }
        if !invalid.is_empty() {
            return Err(format!(
                "Invalid metrics: {invalid:?}. Valid metrics are: {:?}",
                all_metric_names()
            ));
        }

        let model = self
            .model
            .iter()
            .map(|m| m.trim())
            .find(|m| !m.is_empty())
            .unwrap_or(default_model)
            .to_string();
        let deduplicated = metrics.len() != self.eval_metrices.len();
        let context_chunks = self.context_chunks();

        Ok(ValidatedRequest {
            metrics,
            deduplicated,
            artifact: Artifact {
                user_query: self.user_query,
                ai_response: self.ai_response,
                context_chunks,
                model,
            },
        })
    }
}
