//! Core data model: metrics, the rating/score/badge ordinal, per-metric
//! results and the composite verdict returned to callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Metric
// ---------------------------------------------------------------------------

/// A quality dimension scored by its own evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    Accuracy,
    Hallucination,
    Authoritativeness,
    Usefulness,
}

impl Metric {
    /// Every known metric, in canonical order.
    pub const ALL: [Metric; 4] = [
        Metric::Accuracy,
        Metric::Hallucination,
        Metric::Authoritativeness,
        Metric::Usefulness,
    ];

    /// Display name, e.g. `"Accuracy"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Accuracy => "Accuracy",
            Metric::Hallucination => "Hallucination",
            Metric::Authoritativeness => "Authoritativeness",
            Metric::Usefulness => "Usefulness",
        }
    }

    /// Lower-case key used in the verdict payload and config files.
    pub fn key(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::Hallucination => "hallucination",
            Metric::Authoritativeness => "authoritativeness",
            Metric::Usefulness => "usefulness",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a metric name is not one of [`Metric::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric: {0}")]
pub struct UnknownMetric(pub String);

impl FromStr for Metric {
    type Err = UnknownMetric;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Rating / Badge ordinal
// ---------------------------------------------------------------------------

/// Qualitative rating. Carries the ordinal that score and badge derive from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rating {
    Poor,
    Fair,
    Good,
    Great,
}

/// Badge awarded for a rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Badge {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl Rating {
    /// Numeric score: Great=3, Good=2, Fair=1, Poor=0.
    pub fn score(self) -> u8 {
        match self {
            Rating::Great => 3,
            Rating::Good => 2,
            Rating::Fair => 1,
            Rating::Poor => 0,
        }
    }

    pub fn badge(self) -> Badge {
        match self {
            Rating::Great => Badge::Platinum,
            Rating::Good => Badge::Gold,
            Rating::Fair => Badge::Silver,
            Rating::Poor => Badge::Bronze,
        }
    }

    /// Inverse of [`Rating::score`]. `None` outside `0..=3`.
    pub fn from_score(score: i64) -> Option<Rating> {
        match score {
            3 => Some(Rating::Great),
            2 => Some(Rating::Good),
            1 => Some(Rating::Fair),
            0 => Some(Rating::Poor),
            _ => None,
        }
    }

    /// Threshold table applied to an average score.
    ///
    /// `>= 2.5` Great, `>= 2.0` Good, `>= 1.0` Fair, otherwise Poor.
    pub fn from_mean(mean: f64) -> Rating {
        if mean >= 2.5 {
            Rating::Great
        } else if mean >= 2.0 {
            Rating::Good
        } else if mean >= 1.0 {
            Rating::Fair
        } else {
            Rating::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rating::Great => "Great",
            Rating::Good => "Good",
            Rating::Fair => "Fair",
            Rating::Poor => "Poor",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "great" => Ok(Rating::Great),
            "good" => Ok(Rating::Good),
            "fair" => Ok(Rating::Fair),
            "poor" => Ok(Rating::Poor),
            other => Err(format!("invalid rating: {other}")),
        }
    }
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Badge::Platinum => "Platinum",
            Badge::Gold => "Gold",
            Badge::Silver => "Silver",
            Badge::Bronze => "Bronze",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// MetricResult
// ---------------------------------------------------------------------------

/// Structured evaluation of one metric.
///
/// Only constructible from a [`Rating`], so rating, score and badge can
/// never disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
    metric: Metric,
    rating: Rating,
    score: u8,
    badge: Badge,
    reasoning: String,
}

impl MetricResult {
    pub fn new(metric: Metric, rating: Rating, reasoning: impl Into<String>) -> Self {
        Self {
            metric,
            rating,
            score: rating.score(),
            badge: rating.badge(),
            reasoning: reasoning.into(),
        }
    }

    /// Poor/0/Bronze stand-in for a metric whose task did not produce a result.
    pub fn placeholder(metric: Metric, reason: impl fmt::Display) -> Self {
        Self::new(metric, Rating::Poor, format!("Evaluation failed: {reason}"))
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn rating(&self) -> Rating {
        self.rating
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn badge(&self) -> Badge {
        self.badge
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }
}

// ---------------------------------------------------------------------------
// Composite verdict
// ---------------------------------------------------------------------------

/// Overall rating block of a [`CompositeVerdict`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallEvaluation {
    pub overall_rating: Rating,
    /// Mean of the selected metrics' scores, rounded to one decimal.
    pub overall_score: f64,
    pub overall_badge: Badge,
    pub summary: String,
}

/// Aggregated, caller-facing result of one evaluation session.
///
/// Unselected metrics are `None` and serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeVerdict {
    pub accuracy: Option<MetricResult>,
    pub hallucination: Option<MetricResult>,
    pub authoritativeness: Option<MetricResult>,
    pub usefulness: Option<MetricResult>,
    pub overall: OverallEvaluation,
    pub evaluation_id: String,
    /// Wall-clock seconds from admission to verdict, two decimals.
    pub processing_time: f64,
}

impl CompositeVerdict {
    pub fn get(&self, metric: Metric) -> Option<&MetricResult> {
        match metric {
            Metric::Accuracy => self.accuracy.as_ref(),
            Metric::Hallucination => self.hallucination.as_ref(),
            Metric::Authoritativeness => self.authoritativeness.as_ref(),
            Metric::Usefulness => self.usefulness.as_ref(),
        }
    }

    pub(crate) fn slot_mut(&mut self, metric: Metric) -> &mut Option<MetricResult> {
        match metric {
            Metric::Accuracy => &mut self.accuracy,
            Metric::Hallucination => &mut self.hallucination,
            Metric::Authoritativeness => &mut self.authoritativeness,
            Metric::Usefulness => &mut self.usefulness,
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// The submitted response under evaluation, with its query and context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub user_query: String,
    pub ai_response: String,
    /// Non-empty context chunks, in submission order.
    pub context_chunks: Vec<String>,
    /// Model identifier handed to the evaluator.
    pub model: String,
}
