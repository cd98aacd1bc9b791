//! Prompt rendering for metric evaluations.

use std::fmt::Write;

use crate::evaluation::Artifact;

use super::criteria::MetricCriteria;

/// System and user prompt for one metric evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
}

impl MetricPrompt {
    pub fn render(criteria: &MetricCriteria, artifact: &Artifact) -> Self {
        Self {
            system_prompt: criteria.system_prompt.clone(),
            user_prompt: render_user_prompt(criteria, artifact),
        }
    }
}

fn render_user_prompt(criteria: &MetricCriteria, artifact: &Artifact) -> String {
    let metric = criteria.metric.as_str();
    let upper = metric.to_ascii_uppercase();
    let context = artifact
        .context_chunks
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    // `write!` into a String cannot fail.
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are a specialized {metric} evaluation expert for AI responses in professional/legal contexts.\n"
    );
    let _ = writeln!(out, "EVALUATION TASK: Assess the {metric} of the AI response below.\n");
    let _ = writeln!(out, "USER QUERY:\n{}\n", artifact.user_query);
    let _ = writeln!(out, "AI RESPONSE TO EVALUATE:\n{}\n", artifact.ai_response);
    let _ = writeln!(out, "CONTEXT CHUNKS PROVIDED:\n{context}\n");
    let _ = writeln!(out, "{upper} EVALUATION CRITERIA:\n{}\n", criteria.definition);
    let _ = writeln!(out, "RATING SCALE:\n{}\n", criteria.rating_scale_lines().join("\n"));

    if !criteria.focus_areas.is_empty() {
        let _ = writeln!(out, "{upper} FOCUS AREAS:");
        for (i, area) in criteria.focus_areas.iter().enumerate() {
            let _ = writeln!(out, "{}. {area}", i + 1);
        }
        out.push('\n');
    }
    if !criteria.reasoning_guidelines.is_empty() {
        let _ = writeln!(out, "DETAILED REASONING GUIDELINES FOR {upper}:");
        for guideline in &criteria.reasoning_guidelines {
            let _ = writeln!(out, "- {guideline}");
        }
        out.push('\n');
    }
    if !criteria.closing_instruction.is_empty() {
        let _ = writeln!(out, "{}\n", criteria.closing_instruction);
    }

    out.push_str(
        "REASONING REQUIREMENTS:\n\
         Your reasoning must be comprehensive and include:\n\
         1. SPECIFIC EVIDENCE: Quote specific parts of the AI response that support your evaluation\n\
         2. CONTEXT ANALYSIS: Explain how the provided context chunks relate to your assessment\n\
         3. DETAILED JUSTIFICATION: Provide clear explanations for why you assigned this particular rating\n\
         4. COMPARATIVE ANALYSIS: Reference the rating criteria and explain how the response meets or fails to meet each level\n\n\
         Provide your evaluation in this exact format:\n\
         RATING: [Great/Good/Fair/Poor]\n\
         SCORE: [3/2/1/0]\n\
         REASONING: [At least 3-4 sentences with specific quotes and references.]",
    );
    out
}
