//! Evaluation criteria per metric.
//!
//! Every metric ships with built-in criteria. A directory of YAML files can
//! override them one metric at a time; fields a file leaves out keep their
//! built-in value.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluation::Metric;

/// Errors loading criteria overrides.
#[derive(Debug, Error)]
pub enum CriteriaError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid criteria in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// One level of a rating scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingLevel {
    pub label: String,
    pub description: String,
}

/// Everything a handler needs to prompt for one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricCriteria {
    pub metric: Metric,
    /// Handler name, e.g. `AccuracyAgent`.
    pub agent_name: String,
    pub system_prompt: String,
    pub definition: String,
    /// Keyed by score, always `0..=3`.
    pub rating_scale: BTreeMap<u8, RatingLevel>,
    pub focus_areas: Vec<String>,
    pub reasoning_guidelines: Vec<String>,
    pub closing_instruction: String,
}

impl MetricCriteria {
    /// Rating scale lines from best to worst, e.g. `- 3 (Great): ...`.
    pub fn rating_scale_lines(&self) -> Vec<String> {
        self.rating_scale
            .iter()
            .rev()
            .map(|(score, level)| format!("- {score} ({}): {}", level.label, level.description))
            .collect()
    }

    fn apply(&mut self, file: CriteriaFile, path: &Path) -> Result<(), CriteriaError> {
        let invalid = |reason: String| CriteriaError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(name) = file.name.filter(|n| !n.trim().is_empty()) {
            self.agent_name = name;
        }
        if let Some(system_prompt) = file
            .prompting_strategy
            .and_then(|p| p.system_prompt)
            .filter(|s| !s.trim().is_empty())
        {
            self.system_prompt = system_prompt;
        }
        if let Some(criteria) = file.evaluation_criteria {
            if let Some(definition) = criteria.definition {
                if definition.trim().is_empty() {
                    return Err(invalid("definition is empty".into()));
                }
                self.definition = definition;
            }
            if let Some(scale) = criteria.rating_scale {
                let mut parsed = BTreeMap::new();
                for (key, level) in scale {
                    let score: u8 = key
                        .trim()
                        .parse()
                        .ok()
                        .filter(|s| *s <= 3)
                        .ok_or_else(|| invalid(format!("rating scale key {key:?} is not 0-3")))?;
                    parsed.insert(score, level);
                }
                if parsed.len() != 4 {
                    return Err(invalid("rating scale must define scores 0, 1, 2 and 3".into()));
                }
                self.rating_scale = parsed;
            }
        }
        if let Some(focus_areas) = file.focus_areas {
            self.focus_areas = focus_areas;
        }
        if let Some(guidelines) = file.reasoning_guidelines {
            self.reasoning_guidelines = guidelines;
        }
        if let Some(closing) = file.closing_instruction {
            self.closing_instruction = closing;
        }
        Ok(())
    }
}

// ============================================================================
// YAML shape
// ============================================================================

#[derive(Debug, Deserialize)]
struct CriteriaFile {
    metric: String,
    name: Option<String>,
    evaluation_criteria: Option<CriteriaSection>,
    prompting_strategy: Option<PromptingSection>,
    focus_areas: Option<Vec<String>>,
    reasoning_guidelines: Option<Vec<String>>,
    closing_instruction: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CriteriaSection {
    definition: Option<String>,
    rating_scale: Option<BTreeMap<String, RatingLevel>>,
}

#[derive(Debug, Deserialize)]
struct PromptingSection {
    system_prompt: Option<String>,
}

// ============================================================================
// CriteriaSet
// ============================================================================

/// Criteria for every metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriteriaSet {
    criteria: BTreeMap<Metric, MetricCriteria>,
}

impl Default for CriteriaSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CriteriaSet {
    pub fn builtin() -> Self {
        let criteria = Metric::ALL
            .into_iter()
            .map(|metric| (metric, builtin_criteria(metric)))
            .collect();
        Self { criteria }
    }

    /// Built-in criteria with overrides from `*.yaml` / `*.yml` files in `dir`.
    ///
    /// A missing directory yields the built-ins. Any unreadable or invalid
    /// file fails the whole load.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, CriteriaError> {
        let dir = dir.as_ref();
        let mut set = Self::builtin();
        if !dir.exists() {
            tracing::info!(dir = %dir.display(), "criteria directory not found; using built-in criteria");
            return Ok(set);
        }

        let io_err = |source| CriteriaError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path
                .extension()
                .map_or(false, |ext| ext == "yaml" || ext == "yml")
            {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            set.load_file(&path)?;
        }
        Ok(set)
    }

    fn load_file(&mut self, path: &Path) -> Result<(), CriteriaError> {
        let text = std::fs::read_to_string(path).map_err(|source| CriteriaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: CriteriaFile =
            serde_yaml::from_str(&text).map_err(|source| CriteriaError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        let metric: Metric = file.metric.parse().map_err(|e: crate::evaluation::UnknownMetric| {
            CriteriaError::Invalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let mut criteria = builtin_criteria(metric);
        criteria.apply(file, path)?;
        tracing::info!(%metric, path = %path.display(), "loaded criteria override");
        self.criteria.insert(metric, criteria);
        Ok(())
    }

    pub fn get(&self, metric: Metric) -> Option<&MetricCriteria> {
        self.criteria.get(&metric)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricCriteria> {
        self.criteria.values()
    }
}

// ============================================================================
// Built-ins
// ============================================================================

fn scale(great: &str, good: &str, fair: &str, poor: &str) -> BTreeMap<u8, RatingLevel> {
    [(3, "Great", great), (2, "Good", good), (1, "Fair", fair), (0, "Poor", poor)]
        .into_iter()
        .map(|(score, label, description)| {
            (
                score,
                RatingLevel {
                    label: label.to_string(),
                    description: description.to_string(),
                },
            )
        })
        .collect()
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn builtin_criteria(metric: Metric) -> MetricCriteria {
    match metric {
        Metric::Accuracy => MetricCriteria {
            metric,
            agent_name: "AccuracyAgent".into(),
            system_prompt: "You are an expert fact-checker and accuracy evaluator for professional AI responses.".into(),
            definition: "Response contains information that is true and correct. It doesn't have any hallucination (information that is completely invented by the AI that does not exist) but some aspects of the response is incorrect in some way.".into(),
            rating_scale: scale(
                "Response is accurate and contains no factual errors or hallucinations",
                "Response is mostly accurate with minor factual issues",
                "Response has some accuracy but contains notable factual errors",
                "Response contains significant factual errors or does not provide expected results",
            ),
            focus_areas: lines(&[
                "Factual correctness of all statements",
                "Absence of hallucinated information",
                "Proper representation of cited sources",
                "Logical consistency throughout the response",
                "Alignment with established legal principles",
            ]),
            reasoning_guidelines: lines(&[
                "Quote specific statements from the AI response and verify them against context chunks",
                "Identify any factual errors or misrepresentations with specific examples",
                "Explain how well the response aligns with the provided legal sources",
                "Note any logical inconsistencies or contradictions within the response",
                "Reference specific legal principles or facts that support or contradict the response",
                "Provide examples of accurate information and explain why it's correct",
                "If errors exist, specify what they are and how they deviate from established facts",
            ]),
            closing_instruction: "Check each factual claim against the provided context chunks and general knowledge.".into(),
        },
        Metric::Hallucination => MetricCriteria {
            metric,
            agent_name: "HallucinationAgent".into(),
            system_prompt: "You are an expert in detecting AI hallucinations and fabricated information in professional responses.".into(),
            definition: "Response should not contain information that is completely 'made up' (i.e., citations or references to information that does not exist and cannot be verified).".into(),
            rating_scale: scale(
                "No fabricated information, all references are verifiable",
                "Minimal risk of fabrication, references are mostly verifiable",
                "Some potentially fabricated elements or unverifiable references",
                "Contains made up law, citations, or completely fabricated information",
            ),
            focus_areas: lines(&[
                "Fabricated case citations or legal references",
                "Made-up statutes, regulations, or legal principles",
                "Non-existent court decisions or legal precedents",
                "Invented legal terminology or concepts",
                "False claims about legal procedures or requirements",
            ]),
            reasoning_guidelines: lines(&[
                "Identify all specific citations, case names, and legal references in the AI response",
                "Cross-reference each citation against the provided context chunks",
                "Quote any suspicious or unverifiable claims and explain why they appear fabricated",
                "Explain the difference between general legal concepts (acceptable) vs. specific false claims (hallucination)",
                "Note any overly specific details that lack proper source attribution",
                "If no hallucinations found, specify which elements you verified and why they appear legitimate",
            ]),
            closing_instruction: "Verify that all specific legal references, case names, and statutory citations can be validated.".into(),
        },
        Metric::Authoritativeness => MetricCriteria {
            metric,
            agent_name: "AuthoritativenessAgent".into(),
            system_prompt: "You are an expert in legal authority and citation evaluation for professional legal responses.".into(),
            definition: "Citations should be included as instructed for each task. Where included citations should be individually checked as indicated by your Lead. Citations should be valid and support the legal statements in the response.".into(),
            rating_scale: scale(
                "Citations are relevant, support the response, represent good law, and are authoritative/citable",
                "Citations are relevant and support the response but may lack recency or be from lower courts",
                "Citations support the response but are not relevant to query or not good law or not authoritative",
                "Citations do not support any part of the AI-generated response",
            ),
            focus_areas: lines(&[
                "Relevance of citations to the specific query",
                "Quality and reliability of cited sources",
                "Recency and current validity of legal authorities",
                "Hierarchical appropriateness (primary vs secondary sources)",
                "Jurisdictional relevance of cited authorities",
            ]),
            reasoning_guidelines: lines(&[
                "List each citation mentioned in the AI response and evaluate its authority level",
                "Explain how each cited source directly supports or relates to the user's query",
                "Assess the hierarchical quality of sources (statutes, court cases, regulations vs. secondary sources)",
                "Note the jurisdictional relevance (e.g., California law for California questions)",
                "Comment on the recency and current validity of cited legal authorities",
                "Identify any statements that lack proper authoritative support",
            ]),
            closing_instruction: "Assess whether citations properly support the legal statements made in the response.".into(),
        },
        Metric::Usefulness => MetricCriteria {
            metric,
            agent_name: "UsefulnessAgent".into(),
            system_prompt: "You are an expert in evaluating the overall usefulness and quality of professional AI responses.".into(),
            definition: "Overall assessment of response quality considering accuracy, hallucination avoidance, responsiveness, completeness, authoritativeness and appropriateness.".into(),
            rating_scale: scale(
                "Excellent response that is accurate, non-hallucinatory, responsive, complete, authoritative and appropriate",
                "OK response without accuracy issues but may have minor issues in other dimensions",
                "Deficient response related to prompt but has major issues making it insufficient for users",
                "Bad response unrelated to prompt or has major issues making it embarrassing to display",
            ),
            focus_areas: lines(&[
                "Responsiveness to the user's specific question",
                "Completeness of the answer provided",
                "Appropriateness for the intended audience",
                "Practical applicability of the information",
                "Overall coherence and organization",
                "Balance of comprehensiveness vs clarity",
            ]),
            reasoning_guidelines: lines(&[
                "Analyze how directly the response addresses the specific user query",
                "Evaluate the completeness by identifying what questions are answered vs. what might be missing",
                "Comment on the practical value and actionability of the information provided",
                "Assess the clarity and organization of the response structure",
                "Quote specific examples that demonstrate high utility or identify gaps in usefulness",
                "Assess if the response would help a professional make informed decisions",
            ]),
            closing_instruction: "Consider whether a professional would find this response valuable and actionable.".into(),
        },
    }
}
