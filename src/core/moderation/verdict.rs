// Verdict interpretation - turns a raw classifier result into one of four verdicts.
//
// Pure function, no I/O. Everything the classifier said is reduced to
// CLEAN / INAPPROPRIATE / UNCERTAIN / UNAVAILABLE plus a confidence value.

use super::moderation_models::{ClassificationResult, Verdict};

/// Confidence reported for scores that landed inside the margin band.
const UNCERTAIN_CONFIDENCE: f64 = 0.5;

/// Map a classification result to a verdict and a confidence in `[0, 1]`.
///
/// * failed calls are `Unavailable` with confidence 0
/// * `score >= threshold` is `Inappropriate`
/// * `score <= threshold - margin_band` is `Clean`
/// * anything in between (including NaN) is `Uncertain`
pub fn interpret(result: &ClassificationResult, threshold: f64, margin_band: f64) -> (Verdict, f64) {
    if !result.succeeded {
        return (Verdict::Unavailable, 0.0);
    }

    let score = result.raw_score;
    if score >= threshold {
        (Verdict::Inappropriate, score.min(1.0))
    } else if score <= threshold - margin_band {
        (Verdict::Clean, (1.0 - score).clamp(0.0, 1.0))
    } else {
        (Verdict::Uncertain, UNCERTAIN_CONFIDENCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::ClassifierErrorKind;

    fn scored(score: f64) -> ClassificationResult {
        ClassificationResult::success("req", "label", score, 12)
    }

    #[test]
    fn test_failed_results_are_unavailable() {
        for kind in [
            ClassifierErrorKind::Timeout,
            ClassifierErrorKind::TransportError,
            ClassifierErrorKind::RateLimited,
            ClassifierErrorKind::MalformedResponse,
        ] {
            let result = ClassificationResult::failure("req", kind, 40);
            assert_eq!(interpret(&result, 0.5, 0.1), (Verdict::Unavailable, 0.0));
        }
    }

    #[test]
    fn test_failure_ignores_stale_score() {
        let mut result = ClassificationResult::failure("req", ClassifierErrorKind::Timeout, 0);
        result.raw_score = 0.99;
        assert_eq!(interpret(&result, 0.5, 0.1).0, Verdict::Unavailable);
    }

    #[test]
    fn test_clean_scenario() {
        let (verdict, confidence) = interpret(&scored(0.02), 0.5, 0.1);
        assert_eq!(verdict, Verdict::Clean);
        assert!((confidence - 0.98).abs() < 1e-9);
    }

    #[test]
    fn test_toxic_scenario() {
        let (verdict, confidence) = interpret(&scored(0.97), 0.5, 0.1);
        assert_eq!(verdict, Verdict::Inappropriate);
        assert!((confidence - 0.97).abs() < 1e-9);
    }

    #[test]
    fn test_borderline_scenario() {
        assert_eq!(
            interpret(&scored(0.45), 0.5, 0.1),
            (Verdict::Uncertain, UNCERTAIN_CONFIDENCE)
        );
    }

    #[test]
    fn test_boundaries() {
        // Exactly at the threshold counts as inappropriate.
        assert_eq!(interpret(&scored(0.5), 0.5, 0.1).0, Verdict::Inappropriate);
        // Exactly at threshold - margin counts as clean.
        assert_eq!(interpret(&scored(0.4), 0.5, 0.1).0, Verdict::Clean);
        assert_eq!(interpret(&scored(0.4000001), 0.5, 0.1).0, Verdict::Uncertain);
        assert_eq!(interpret(&scored(0.4999999), 0.5, 0.1).0, Verdict::Uncertain);
        assert_eq!(interpret(&scored(0.0), 0.5, 0.1).0, Verdict::Clean);
        assert_eq!(interpret(&scored(1.0), 0.5, 0.1).0, Verdict::Inappropriate);
    }

    #[test]
    fn test_zero_margin_has_no_uncertain_zone() {
        assert_eq!(interpret(&scored(0.4999), 0.5, 0.0).0, Verdict::Clean);
        assert_eq!(interpret(&scored(0.5), 0.5, 0.0).0, Verdict::Inappropriate);
    }

    #[test]
    fn test_score_sweep_obeys_threshold_law() {
        let (threshold, margin) = (0.7, 0.2);
        for step in 0..=100 {
            let score = step as f64 / 100.0;
            let (verdict, confidence) = interpret(&scored(score), threshold, margin);
            let expected = if score >= threshold {
                Verdict::Inappropriate
            } else if score <= threshold - margin {
                Verdict::Clean
            } else {
                Verdict::Uncertain
            };
            assert_eq!(verdict, expected, "score {}", score);
            assert!((0.0..=1.0).contains(&confidence));
        }
    }

    #[test]
    fn test_nan_score_is_uncertain() {
        assert_eq!(interpret(&scored(f64::NAN), 0.5, 0.1).0, Verdict::Uncertain);
    }
}
