//! Service settings, read from the environment.
//!
//! Variable names are the upper-cased field names (`PORT`,
//! `MAX_CONCURRENT_EVALUATIONS`, ...). Durations are given in seconds and
//! may be fractional.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::evaluation::{RetryPolicy, RuntimeOptions, ServiceOptions};
use crate::llm::{ChatEvaluatorConfig, Provider};

/// Invalid or malformed settings.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Malformed {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,

    pub max_concurrent_evaluations: usize,
    /// Session deadline, seconds.
    pub evaluation_timeout: f64,
    /// Budget of a task's first attempt, seconds.
    pub agent_communication_timeout: f64,
    pub llm_request_timeout: f64,
    pub agent_retry_attempts: u32,
    pub agent_retry_delay: f64,
    pub min_attempt_timeout: f64,
    pub reset_on_failure: bool,
    pub runtime_stop_timeout: f64,
    pub runtime_reset_delay: f64,

    pub model_provider: Provider,
    pub gpt_model: String,
    pub claude_model: String,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub anthropic_api_key: Option<String>,
    pub litellm_proxy_url: Option<String>,
    pub llm_temperature: f64,
    pub llm_max_tokens: u32,

    pub agents_config_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9777,
            max_concurrent_evaluations: 5,
            evaluation_timeout: 300.0,
            agent_communication_timeout: 25.0,
            llm_request_timeout: 20.0,
            agent_retry_attempts: 1,
            agent_retry_delay: 0.5,
            min_attempt_timeout: 5.0,
            reset_on_failure: true,
            runtime_stop_timeout: 5.0,
            runtime_reset_delay: 0.5,
            model_provider: Provider::Gpt,
            gpt_model: "gpt-4o-mini".into(),
            claude_model: "claude-3-sonnet-20240229".into(),
            openai_api_key: None,
            anthropic_api_key: None,
            litellm_proxy_url: None,
            llm_temperature: 0.1,
            llm_max_tokens: 2000,
            agents_config_dir: PathBuf::from("agents_config"),
        }
    }
}

impl Settings {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut s = Self::default();

        if let Some(v) = get("HOST") {
            s.host = v;
        }
        parse_into(&get, "PORT", &mut s.port)?;
        parse_into(&get, "MAX_CONCURRENT_EVALUATIONS", &mut s.max_concurrent_evaluations)?;
        parse_into(&get, "EVALUATION_TIMEOUT", &mut s.evaluation_timeout)?;
        parse_into(&get, "AGENT_COMMUNICATION_TIMEOUT", &mut s.agent_communication_timeout)?;
        parse_into(&get, "LLM_REQUEST_TIMEOUT", &mut s.llm_request_timeout)?;
        parse_into(&get, "AGENT_RETRY_ATTEMPTS", &mut s.agent_retry_attempts)?;
        parse_into(&get, "AGENT_RETRY_DELAY", &mut s.agent_retry_delay)?;
        parse_into(&get, "MIN_ATTEMPT_TIMEOUT", &mut s.min_attempt_timeout)?;
        parse_into(&get, "RUNTIME_STOP_TIMEOUT", &mut s.runtime_stop_timeout)?;
        parse_into(&get, "RUNTIME_RESET_DELAY", &mut s.runtime_reset_delay)?;
        parse_into(&get, "MODEL_PROVIDER", &mut s.model_provider)?;
        parse_into(&get, "LLM_TEMPERATURE", &mut s.llm_temperature)?;
        parse_into(&get, "LLM_MAX_TOKENS", &mut s.llm_max_tokens)?;
        if let Some(v) = get("RESET_ON_FAILURE") {
            s.reset_on_failure = parse_bool("RESET_ON_FAILURE", &v)?;
        }
        if let Some(v) = get("GPT_MODEL") {
            s.gpt_model = v;
        }
        if let Some(v) = get("CLAUDE_MODEL") {
            s.claude_model = v;
        }
        s.openai_api_key = get("OPENAI_API_KEY");
        s.anthropic_api_key = get("ANTHROPIC_API_KEY");
        s.litellm_proxy_url = get("LITELLM_PROXY_URL");
        if let Some(v) = get("AGENTS_CONFIG_DIR") {
            s.agents_config_dir = PathBuf::from(v);
        }

        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_evaluations == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_evaluations must be at least 1".into(),
            ));
        }
        let positive = [
            ("evaluation_timeout", self.evaluation_timeout),
            ("agent_communication_timeout", self.agent_communication_timeout),
            ("llm_request_timeout", self.llm_request_timeout),
            ("min_attempt_timeout", self.min_attempt_timeout),
            ("runtime_stop_timeout", self.runtime_stop_timeout),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
            }
        }
        let non_negative = [
            ("agent_retry_delay", self.agent_retry_delay),
            ("runtime_reset_delay", self.runtime_reset_delay),
            ("llm_temperature", self.llm_temperature),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must not be negative, got {value}")));
            }
        }
        self.service_options().map(|_| ())
    }

    /// Model used when a request does not name one.
    pub fn default_model(&self) -> &str {
        match self.model_provider {
            Provider::Gpt => &self.gpt_model,
            Provider::Claude => &self.claude_model,
        }
    }

    pub fn service_options(&self) -> Result<ServiceOptions, ConfigError> {
        Ok(ServiceOptions {
            max_concurrent_evaluations: self.max_concurrent_evaluations,
            evaluation_timeout: secs("EVALUATION_TIMEOUT", self.evaluation_timeout)?,
            llm_request_timeout: secs("LLM_REQUEST_TIMEOUT", self.llm_request_timeout)?,
            retry: RetryPolicy {
                base_timeout: secs("AGENT_COMMUNICATION_TIMEOUT", self.agent_communication_timeout)?,
                retry_attempts: self.agent_retry_attempts,
                retry_delay: secs("AGENT_RETRY_DELAY", self.agent_retry_delay)?,
                min_attempt_timeout: secs("MIN_ATTEMPT_TIMEOUT", self.min_attempt_timeout)?,
                reset_on_failure: self.reset_on_failure,
            },
            runtime: RuntimeOptions {
                stop_timeout: secs("RUNTIME_STOP_TIMEOUT", self.runtime_stop_timeout)?,
                settle_delay: secs("RUNTIME_RESET_DELAY", self.runtime_reset_delay)?,
            },
        })
    }

    pub fn evaluator_config(&self) -> ChatEvaluatorConfig {
        ChatEvaluatorConfig {
            openai_api_key: self.openai_api_key.clone(),
            anthropic_api_key: self.anthropic_api_key.clone(),
            proxy_url: self.litellm_proxy_url.clone(),
            temperature: self.llm_temperature,
            max_tokens: self.llm_max_tokens,
        }
    }
}

/// Longest accepted timeout or delay, one week.
const MAX_DURATION_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Deadlines are computed as `Instant::now() + duration`, so values beyond
/// [`MAX_DURATION_SECS`] are rejected rather than left to overflow there.
fn secs(key: &'static str, value: f64) -> Result<Duration, ConfigError> {
    let malformed = |reason: String| ConfigError::Malformed {
        key,
        value: value.to_string(),
        reason,
    };
    if !(0.0..=MAX_DURATION_SECS).contains(&value) {
        return Err(malformed(format!("expected 0 to {MAX_DURATION_SECS} seconds")));
    }
    Duration::try_from_secs_f64(value).map_err(|e| malformed(e.to_string()))
}

fn parse_into<T, G>(get: &G, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(value) = get(key) {
        *slot = value.parse().map_err(|e: T::Err| ConfigError::Malformed {
            key,
            value: value.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Malformed {
            key,
            value: value.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}
