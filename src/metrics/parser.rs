//! Parsing of evaluator output into a [`MetricResult`].
//!
//! Two shapes are accepted:
//!
//! - a JSON object with `rating`, `score` and `reasoning`, bare or inside a
//!   fenced code block;
//! - the line format requested by the prompt:
//!
//! ```text
//! RATING: Good
//! SCORE: 2
//! REASONING: The response cites the correct statute ...
//! ```
//!
//! When both a score and a rating are present and disagree, the score wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::evaluation::{Metric, MetricResult, Rating};

/// Reasoning shorter than this is replaced with a stock note.
const MIN_REASONING_CHARS: usize = 20;

static FIELD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[\s*#_>-]*(rating|score|reasoning)[\s*_]*:[\s*_]*(.*)$").unwrap()
});
static RATING_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(great|good|fair|poor)\b").unwrap());
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+").unwrap());
static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

/// Evaluator output that could not be turned into a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("evaluator returned an empty response")]
    Empty,

    #[error("no rating or score found in evaluator response")]
    MissingRating,

    #[error("score {0:?} is outside 0-3 and no valid rating was given")]
    InvalidScore(String),

    #[error("unrecognized rating {0:?}")]
    InvalidRating(String),
}

/// Raw fields pulled out of either format.
#[derive(Debug, Default)]
struct RawEvaluation {
    rating: Option<String>,
    score: Option<String>,
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonEvaluation {
    rating: Option<String>,
    score: Option<Value>,
    reasoning: Option<String>,
}

/// Parse evaluator text for `metric`.
pub fn parse_evaluation(metric: Metric, text: &str) -> Result<MetricResult, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let raw = parse_json(text).unwrap_or_else(|| parse_lines(text));
    let rating = resolve_rating(metric, &raw)?;

    let reasoning = raw
        .reasoning
        .map(|r| r.trim().to_string())
        .filter(|r| r.chars().count() >= MIN_REASONING_CHARS)
        .unwrap_or_else(|| {
            format!(
                "Limited reasoning provided for {metric} evaluation. Rating: {rating}, Score: {}",
                rating.score()
            )
        });

    Ok(MetricResult::new(metric, rating, reasoning))
}

fn resolve_rating(metric: Metric, raw: &RawEvaluation) -> Result<Rating, ParseError> {
    let from_rating = match raw.rating.as_deref() {
        Some(value) => Some(
            RATING_WORD
                .captures(value)
                .and_then(|c| c[1].parse::<Rating>().ok())
                .ok_or_else(|| ParseError::InvalidRating(value.trim().to_string())),
        ),
        None => None,
    };
    let from_score = raw.score.as_deref().map(|value| {
        INTEGER
            .find(value)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .and_then(Rating::from_score)
            .ok_or_else(|| ParseError::InvalidScore(value.trim().to_string()))
    });

    match (from_score, from_rating) {
        (Some(Ok(by_score)), by_rating) => {
            if let Some(Ok(by_rating)) = by_rating {
                if by_rating != by_score {
                    tracing::debug!(
                        %metric,
                        rating = %by_rating,
                        score = by_score.score(),
                        "rating and score disagree; using score"
                    );
                }
            }
            Ok(by_score)
        }
        (Some(Err(_)), Some(Ok(by_rating))) => Ok(by_rating),
        (Some(Err(e)), _) => Err(e),
        (None, Some(by_rating)) => by_rating,
        (None, None) => Err(ParseError::MissingRating),
    }
}

fn parse_json(text: &str) -> Option<RawEvaluation> {
    let candidate = match FENCED.captures(text) {
        Some(c) => c.get(1)?.as_str(),
        None => {
            let start = text.find('{')?;
            let end = text.rfind('}')?;
            text.get(start..=end)?
        }
    };
    let parsed: JsonEvaluation = serde_json::from_str(candidate).ok()?;
    if parsed.rating.is_none() && parsed.score.is_none() {
        return None;
    }
    Some(RawEvaluation {
        rating: parsed.rating,
        score: parsed.score.map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        }),
        reasoning: parsed.reasoning,
    })
}

fn parse_lines(text: &str) -> RawEvaluation {
    let mut raw = RawEvaluation::default();
    let mut reasoning: Vec<&str> = Vec::new();
    let mut in_reasoning = false;

    for line in text.lines().map(str::trim) {
        match FIELD_LINE.captures(line) {
            Some(caps) => {
                let value = caps.get(2).map_or("", |m| m.as_str()).trim();
                match caps[1].to_ascii_lowercase().as_str() {
                    "rating" => {
                        raw.rating.get_or_insert_with(|| value.to_string());
                        in_reasoning = false;
                    }
                    "score" => {
                        raw.score.get_or_insert_with(|| value.to_string());
                        in_reasoning = false;
                    }
                    _ => {
                        if !value.is_empty() {
                            reasoning.push(value);
                        }
                        in_reasoning = true;
                    }
                }
            }
            None if in_reasoning && !line.is_empty() => reasoning.push(line),
            None => {}
        }
    }

    if !reasoning.is_empty() {
        raw.reasoning = Some(reasoning.join(" "));
    }
    raw
}
