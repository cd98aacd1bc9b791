//! HTTP chat evaluator.
//!
//! Speaks the OpenAI chat-completions protocol (directly, or through a
//! LiteLLM proxy which exposes the same protocol for every provider) and
//! the Anthropic messages API.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{is_anthropic_model, Evaluator, EvaluatorError};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Which model family the deployment defaults to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gpt,
    Claude,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gpt => f.write_str("gpt"),
            Provider::Claude => f.write_str("claude"),
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpt" => Ok(Provider::Gpt),
            "claude" => Ok(Provider::Claude),
            other => Err(format!("unknown model provider: {other}")),
        }
    }
}

/// Connection and generation parameters for [`ChatEvaluator`].
#[derive(Debug, Clone, Default)]
pub struct ChatEvaluatorConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    /// OpenAI-compatible proxy. When set, every model goes through it.
    pub proxy_url: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Endpoint a call is routed to.
#[derive(Debug, Clone, PartialEq)]
enum Route {
    OpenAiCompatible { base_url: String },
    Anthropic,
}

/// [`Evaluator`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ChatEvaluator {
    client: reqwest::Client,
    config: ChatEvaluatorConfig,
}

impl ChatEvaluator {
    pub fn new(config: ChatEvaluatorConfig) -> Result<Self, EvaluatorError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EvaluatorError::Communication(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Proxy URL if it looks usable: non-blank, not commented out, http(s).
    fn proxy(&self) -> Option<&str> {
        let url = self.config.proxy_url.as_deref()?.trim();
        if url.is_empty() || url.starts_with('#') || !url.to_ascii_lowercase().contains("http") {
            return None;
        }
        Some(url.trim_end_matches('/'))
    }

    fn route(&self, model: &str) -> Route {
        if let Some(proxy) = self.proxy() {
            return Route::OpenAiCompatible {
                base_url: proxy.to_string(),
            };
        }
        if is_anthropic_model(model) {
            Route::Anthropic
        } else {
            Route::OpenAiCompatible {
                base_url: OPENAI_BASE_URL.to_string(),
            }
        }
    }

    async fn call_openai(
        &self,
        base_url: &str,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<String, EvaluatorError> {
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let mut request = self
            .client
            .post(format!("{base_url}/chat/completions"))
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.config.openai_api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = send(request, timeout).await?;
        openai_text(&response)
    }

    async fn call_anthropic(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<String, EvaluatorError> {
        let api_key = self.config.anthropic_api_key.as_deref().ok_or_else(|| {
            EvaluatorError::Communication("ANTHROPIC_API_KEY is not set".to_string())
        })?;
        let model = model.strip_prefix("anthropic/").unwrap_or(model);
        let body = json!({
            "model": model,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_prompt}],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let request = self
            .client
            .post(format!("{ANTHROPIC_BASE_URL}/v1/messages"))
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let response = send(request, timeout).await?;
        anthropic_text(&response)
    }
}

#[async_trait]
impl Evaluator for ChatEvaluator {
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<String, EvaluatorError> {
        let started = std::time::Instant::now();
        let route = self.route(model);
        tracing::debug!(
            model,
            route = ?route,
            input_chars = system_prompt.len() + user_prompt.len(),
            "evaluator request"
        );

        let result = match &route {
            Route::OpenAiCompatible { base_url } => {
                self.call_openai(base_url, system_prompt, user_prompt, model, timeout)
                    .await
            }
            Route::Anthropic => {
                self.call_anthropic(system_prompt, user_prompt, model, timeout)
                    .await
            }
        };

        match &result {
            Ok(text) => tracing::debug!(
                model,
                elapsed_ms = started.elapsed().as_millis() as u64,
                output_chars = text.len(),
                "evaluator response"
            ),
            Err(e) => tracing::warn!(
                model,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "evaluator call failed"
            ),
        }
        result
    }
}

/// Send, check status, decode JSON.
async fn send(request: reqwest::RequestBuilder, timeout: Duration) -> Result<Value, EvaluatorError> {
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            EvaluatorError::Timeout(timeout)
        } else {
            EvaluatorError::Communication(e.to_string())
        }
    };

    let response = request.send().await.map_err(classify)?;
    let status = response.status();
    let text = response.text().await.map_err(classify)?;

    if !status.is_success() {
        return Err(EvaluatorError::Communication(format!(
            "HTTP {status}: {}",
            truncate(&text, 500)
        )));
    }

    serde_json::from_str(&text).map_err(|e| {
        EvaluatorError::Communication(format!(
            "invalid JSON response: {e} - body: {}",
            truncate(&text, 500)
        ))
    })
}

fn openai_text(response: &Value) -> Result<String, EvaluatorError> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            EvaluatorError::Communication("response has no choices[0].message.content".into())
        })
}

fn anthropic_text(response: &Value) -> Result<String, EvaluatorError> {
    let blocks = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| EvaluatorError::Communication("response has no content blocks".into()))?;

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        return Err(EvaluatorError::Communication(
            "response has no text content".into(),
        ));
    }
    Ok(text)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
