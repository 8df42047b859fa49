//! Feedback assembly: folds per-rule explanations into overall feedback.
//!
//! Policy is fixed:
//! 1. A rule scoring at or above [`STRENGTH_THRESHOLD`] is a strength
//! 2. A rule scoring below [`WEAKNESS_THRESHOLD`] is a weakness
//! 3. Suggestions are merged across rules, first occurrence wins
//! 4. The interpretation is the [`ScoreBand`] of the aggregate score

use crate::types::{Evaluation, ExplainedEvaluation, Feedback, RuleExplanation, ScoreBand};

pub const STRENGTH_THRESHOLD: f64 = 0.7;
pub const WEAKNESS_THRESHOLD: f64 = 0.4;

pub(super) fn assemble(
    evaluation: Evaluation,
    explanations: Vec<RuleExplanation>,
) -> ExplainedEvaluation {
    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();
    let mut suggestions: Vec<String> = Vec::new();

    for explanation in &explanations {
        if explanation.score >= STRENGTH_THRESHOLD {
            strengths.push(format!("{}: {}", explanation.kind, explanation.reasoning));
        } else if explanation.score < WEAKNESS_THRESHOLD {
            weaknesses.push(format!("{}: {}", explanation.kind, explanation.reasoning));
        }

        for suggestion in &explanation.suggestions {
            if !suggestions.contains(suggestion) {
                suggestions.push(suggestion.clone());
            }
        }
    }

    let feedback = Feedback {
        strengths,
        weaknesses,
        suggestions,
        interpretation: ScoreBand::from_score(evaluation.score),
    };

    ExplainedEvaluation {
        evaluation,
        explanations,
        feedback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explanation(kind: &str, score: f64, suggestions: &[&str]) -> RuleExplanation {
        RuleExplanation {
            kind: kind.into(),
            score,
            reasoning: format!("{kind} reasoning"),
            evidence: vec![],
            suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn evaluation(score: f64) -> Evaluation {
        Evaluation {
            score,
            total_weight: 1.0,
            breakdown: vec![],
        }
    }

    #[test]
    fn test_strengths_and_weaknesses_split() {
        let explained = assemble(
            evaluation(0.55),
            vec![
                explanation("high", 0.9, &[]),
                explanation("middle", 0.5, &[]),
                explanation("low", 0.1, &[]),
            ],
        );

        assert_eq!(explained.feedback.strengths, vec!["high: high reasoning"]);
        assert_eq!(explained.feedback.weaknesses, vec!["low: low reasoning"]);
        assert_eq!(explained.feedback.interpretation, ScoreBand::Moderate);
    }

    #[test]
    fn test_threshold_boundaries() {
        let explained = assemble(
            evaluation(0.5),
            vec![
                explanation("at_strength", STRENGTH_THRESHOLD, &[]),
                explanation("at_weakness", WEAKNESS_THRESHOLD, &[]),
            ],
        );

        assert_eq!(explained.feedback.strengths.len(), 1);
        assert!(explained.feedback.weaknesses.is_empty());
    }

    #[test]
    fn test_suggestions_deduplicated_in_order() {
        let explained = assemble(
            evaluation(0.2),
            vec![
                explanation("a", 0.1, &["add sources", "be specific"]),
                explanation("b", 0.2, &["be specific", "use examples"]),
            ],
        );

        assert_eq!(
            explained.feedback.suggestions,
            vec!["add sources", "be specific", "use examples"]
        );
    }
}
