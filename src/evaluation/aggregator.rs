//! Result aggregation: per-metric outcomes into a [`CompositeVerdict`].

use std::time::Duration;

use super::dispatcher::Outcomes;
use super::types::{
    CompositeVerdict, Metric, MetricResult, OverallEvaluation, Rating,
};

/// Key findings quoted in the summary.
const KEY_FINDINGS: usize = 2;

/// Build the verdict for `selected`.
///
/// Failed or missing outcomes become Poor/0/Bronze placeholders and count
/// toward the mean. Metrics outside `selected` stay `None`.
pub fn aggregate(
    selected: &[Metric],
    mut outcomes: Outcomes,
    session_id: &str,
    elapsed: Duration,
) -> CompositeVerdict {
    let results: Vec<MetricResult> = selected
        .iter()
        .map(|&metric| match outcomes.remove(&metric) {
            Some(Ok(result)) => result,
            Some(Err(failure)) => MetricResult::placeholder(metric, failure),
            None => MetricResult::placeholder(metric, "no result was produced"),
        })
        .collect();

    let overall = overall(&results);
    tracing::info!(
        session_id,
        overall_score = overall.overall_score,
        overall_rating = %overall.overall_rating,
        metrics = results.len(),
        "aggregated verdict"
    );

    let mut verdict = CompositeVerdict {
        accuracy: None,
        hallucination: None,
        authoritativeness: None,
        usefulness: None,
        overall,
        evaluation_id: session_id.to_string(),
        processing_time: round_to(elapsed.as_secs_f64(), 2),
    };
    for result in results {
        let metric = result.metric();
        *verdict.slot_mut(metric) = Some(result);
    }
    verdict
}

fn overall(results: &[MetricResult]) -> OverallEvaluation {
    let mean = if results.is_empty() {
        0.0
    } else {
        let total: u32 = results.iter().map(|r| u32::from(r.score())).sum();
        f64::from(total) / results.len() as f64
    };
    let rating = Rating::from_mean(mean);
    let score = round_to(mean, 1);

    let ratings = results
        .iter()
        .map(|r| format!("{}: {}", r.metric(), r.rating()))
        .collect::<Vec<_>>()
        .join(", ");
    let findings = results
        .iter()
        .take(KEY_FINDINGS)
        .map(|r| format!("{}: {}", r.metric(), first_sentence(r)))
        .collect::<Vec<_>>()
        .join("; ");

    OverallEvaluation {
        overall_rating: rating,
        overall_score: score,
        overall_badge: rating.badge(),
        summary: format!(
            "Overall evaluation based on: {ratings}. Average score: {score:.1}/3.0. Key findings: {findings}..."
        ),
    }
}

fn first_sentence(result: &MetricResult) -> String {
    let reasoning = result.reasoning().trim();
    if reasoning.is_empty() {
        return format!("No detailed reasoning for {}", result.metric());
    }
    reasoning.split('.').next().unwrap_or(reasoning).to_string()
}

/// Round the exact binary value to `decimals` places, ties to even.
///
/// Float formatting rounds this way, so a rounded score and its `{:.1}`
/// rendering always agree (0.25 becomes 0.2, 2.75 becomes 2.8).
fn round_to(value: f64, decimals: usize) -> f64 {
    format!("{value:.decimals$}").parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::error::TaskFailure;
    use crate::evaluation::types::Badge;

    fn ok(metric: Metric, rating: Rating) -> (Metric, Result<MetricResult, TaskFailure>) {
        (
            metric,
            Ok(MetricResult::new(metric, rating, format!("{metric} looks right. More detail."))),
        )
    }

    fn timed_out(metric: Metric) -> (Metric, Result<MetricResult, TaskFailure>) {
        (
            metric,
            Err(TaskFailure::CommunicationTimeout {
                metric,
                attempts: 2,
                budget: Duration::from_millis(12_500),
            }),
        )
    }

    #[test]
    fn test_all_four_metrics() {
        let outcomes = Outcomes::from([
            ok(Metric::Accuracy, Rating::Great),
            ok(Metric::Hallucination, Rating::Great),
            ok(Metric::Authoritativeness, Rating::Good),
            ok(Metric::Usefulness, Rating::Great),
        ]);
        let verdict = aggregate(&Metric::ALL, outcomes, "eval_a", Duration::from_millis(4_321));

        assert_eq!(verdict.overall.overall_score, 2.8);
        assert_eq!(verdict.overall.overall_rating, Rating::Great);
        assert_eq!(verdict.overall.overall_badge, Badge::Platinum);
        assert_eq!(verdict.processing_time, 4.32);
        assert_eq!(verdict.evaluation_id, "eval_a");
        assert_eq!(
            verdict.overall.summary,
            "Overall evaluation based on: Accuracy: Great, Hallucination: Great, \
             Authoritativeness: Good, Usefulness: Great. Average score: 2.8/3.0. \
             Key findings: Accuracy: Accuracy looks right; Hallucination: Hallucination looks right..."
        );
    }

    #[test]
    fn test_timed_out_metric_becomes_placeholder() {
        let selected = [Metric::Accuracy, Metric::Usefulness];
        let outcomes = Outcomes::from([ok(Metric::Accuracy, Rating::Great), timed_out(Metric::Usefulness)]);
        let verdict = aggregate(&selected, outcomes, "eval_b", Duration::from_secs(30));

        let usefulness = verdict.usefulness.as_ref().unwrap();
        assert_eq!(usefulness.rating(), Rating::Poor);
        assert_eq!(usefulness.score(), 0);
        assert_eq!(usefulness.badge(), Badge::Bronze);
        assert!(usefulness.reasoning().starts_with("Evaluation failed: "));

        assert_eq!(verdict.overall.overall_score, 1.5);
        assert_eq!(verdict.overall.overall_rating, Rating::Fair);
        assert_eq!(verdict.overall.overall_badge, Badge::Silver);
        assert!(verdict.hallucination.is_none());
        assert!(verdict.authoritativeness.is_none());
    }

    #[test]
    fn test_missing_outcome_is_placeholder() {
        let verdict = aggregate(&[Metric::Hallucination], Outcomes::new(), "eval_c", Duration::ZERO);
        let result = verdict.hallucination.unwrap();
        assert_eq!(result.reasoning(), "Evaluation failed: no result was produced");
        assert_eq!(verdict.overall.overall_score, 0.0);
        assert_eq!(verdict.overall.overall_rating, Rating::Poor);
    }

    #[test]
    fn test_mean_of_exactly_two_and_a_half_is_great() {
        let selected = [Metric::Accuracy, Metric::Usefulness];
        let outcomes = Outcomes::from([ok(Metric::Accuracy, Rating::Great), ok(Metric::Usefulness, Rating::Good)]);
        let verdict = aggregate(&selected, outcomes, "eval_d", Duration::ZERO);
        assert_eq!(verdict.overall.overall_score, 2.5);
        assert_eq!(verdict.overall.overall_rating, Rating::Great);
    }

    #[test]
    fn test_quarter_means_round_half_to_even() {
        let cases = [
            ([Rating::Fair, Rating::Poor, Rating::Poor, Rating::Poor], 0.2, "0.2", Rating::Poor),
            ([Rating::Good, Rating::Fair, Rating::Fair, Rating::Poor], 1.0, "1.0", Rating::Fair),
            ([Rating::Good, Rating::Good, Rating::Fair, Rating::Poor], 1.2, "1.2", Rating::Fair),
            ([Rating::Great, Rating::Great, Rating::Fair, Rating::Poor], 1.8, "1.8", Rating::Fair),
            ([Rating::Great, Rating::Great, Rating::Good, Rating::Fair], 2.2, "2.2", Rating::Good),
        ];
        for (ratings, score, rendered, rating) in cases {
            let outcomes: Outcomes = Metric::ALL
                .into_iter()
                .zip(ratings)
                .map(|(m, r)| ok(m, r))
                .collect();
            let verdict = aggregate(&Metric::ALL, outcomes, "eval_q", Duration::ZERO);
            assert_eq!(verdict.overall.overall_score, score);
            assert!(verdict
                .overall
                .summary
                .contains(&format!("Average score: {rendered}/3.0.")));
            assert_eq!(verdict.overall.overall_rating, rating);
        }
    }

    #[test]
    fn test_processing_time_two_decimals() {
        let verdict = aggregate(&[Metric::Accuracy], Outcomes::new(), "eval_t", Duration::from_millis(1_125));
        assert_eq!(verdict.processing_time, 1.12);
    }

    #[test]
    fn test_every_subset_populates_exactly_selected() {
        let ratings = [Rating::Great, Rating::Fair, Rating::Good, Rating::Poor];
        for mask in 1u8..16 {
            let selected: Vec<Metric> = Metric::ALL
                .into_iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, m)| m)
                .collect();
            let outcomes: Outcomes = selected
                .iter()
                .map(|&m| {
                    let idx = Metric::ALL.iter().position(|x| *x == m).unwrap();
                    ok(m, ratings[idx])
                })
                .collect();
            let verdict = aggregate(&selected, outcomes, "eval_e", Duration::ZERO);

            for metric in Metric::ALL {
                assert_eq!(verdict.get(metric).is_some(), selected.contains(&metric));
            }
            let mean = selected
                .iter()
                .map(|m| f64::from(verdict.get(*m).unwrap().score()))
                .sum::<f64>()
                / selected.len() as f64;
            let score = verdict.overall.overall_score;
            assert!((0.0..=3.0).contains(&score));
            assert_eq!(score, format!("{mean:.1}").parse::<f64>().unwrap());
            assert!(verdict
                .overall
                .summary
                .contains(&format!("Average score: {mean:.1}/3.0.")));
            assert_eq!(verdict.overall.overall_rating, Rating::from_mean(mean));
        }
    }
}
