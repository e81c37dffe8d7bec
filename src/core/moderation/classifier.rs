// Classifier client - one external classification, with timeout, retries and
// error translation.
//
// The client never returns an error: every failure mode ends up in the
// `ClassificationResult` it hands back, so the rest of the pipeline only ever
// deals with values.

use super::backoff::Backoff;
use super::moderation_models::{
    ClassificationRequest, ClassificationResult, ClassifierConfig, ClassifierErrorKind,
};
use super::rate_limiter::QuotaLimiter;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Failure of a single call to the external classifier.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier call timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("malformed classifier response: {0}")]
    Malformed(String),
}

impl ClassifierError {
    pub fn kind(&self) -> ClassifierErrorKind {
        match self {
            ClassifierError::Timeout => ClassifierErrorKind::Timeout,
            ClassifierError::Transport(_) => ClassifierErrorKind::TransportError,
            ClassifierError::RateLimited(_) => ClassifierErrorKind::RateLimited,
            ClassifierError::Malformed(_) => ClassifierErrorKind::MalformedResponse,
        }
    }

    /// A malformed body will be just as malformed next time.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClassifierError::Malformed(_))
    }
}

// ============================================================================
// CLASSIFIER TRAIT (PORT)
// ============================================================================

/// Label and score as reported by the external service.
#[derive(Debug, Clone, PartialEq)]
pub struct RawClassification {
    pub label: String,
    pub score: f64,
}

/// One call to an external text-classification service.
///
/// Implementations live in the infra layer (Gemini, generic HTTP endpoint).
#[async_trait]
pub trait TextClassifier: Send + Sync {
    /// Classify `text`. `timeout` is a hint the implementation may forward to
    /// the service; the client enforces it regardless.
    async fn classify_text(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<RawClassification, ClassifierError>;
}

// Lets the composition root pick a provider at runtime.
#[async_trait]
impl TextClassifier for Box<dyn TextClassifier> {
    async fn classify_text(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<RawClassification, ClassifierError> {
        (**self).classify_text(text, timeout).await
    }
}

#[async_trait]
impl<T: TextClassifier + ?Sized> TextClassifier for Arc<T> {
    async fn classify_text(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<RawClassification, ClassifierError> {
        (**self).classify_text(text, timeout).await
    }
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct ClassifierClient<C: TextClassifier> {
    classifier: C,
    limiter: Arc<QuotaLimiter>,
    config: ClassifierConfig,
    backoff: Backoff,
}

impl<C: TextClassifier> ClassifierClient<C> {
    pub fn new(classifier: C, limiter: Arc<QuotaLimiter>, config: ClassifierConfig) -> Self {
        let backoff = Backoff::new(config.base_backoff, config.max_backoff);
        Self {
            classifier,
            limiter,
            config,
            backoff,
        }
    }

    /// Classify `text`, retrying transient failures.
    pub async fn classify(&self, text: &str) -> ClassificationResult {
        let request = ClassificationRequest::new(text);

        // Empty content cannot be inappropriate.
        if request.text.trim().is_empty() {
            tracing::debug!(request_id = %request.request_id, "Empty text, skipping classifier");
            return ClassificationResult::empty_text(request.request_id);
        }

        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(&request).await {
                Ok(raw) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    tracing::debug!(
                        request_id = %request.request_id,
                        label = %raw.label,
                        score = raw.score,
                        latency_ms,
                        attempt,
                        "Classifier responded"
                    );
                    return ClassificationResult::success(
                        request.request_id,
                        raw.label,
                        raw.score,
                        latency_ms,
                    );
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        request_id = %request.request_id,
                        attempt,
                        max_attempts,
                        error = %err,
                        ?delay,
                        "Classifier call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    tracing::warn!(
                        request_id = %request.request_id,
                        attempt,
                        error = %err,
                        "Classifier call failed, giving up"
                    );
                    return ClassificationResult::failure(request.request_id, err.kind(), latency_ms);
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: &ClassificationRequest,
    ) -> Result<RawClassification, ClassifierError> {
        let _permit = self
            .limiter
            .acquire(self.config.timeout)
            .await
            .map_err(|e| ClassifierError::RateLimited(e.to_string()))?;

        let raw = tokio::time::timeout(
            self.config.timeout,
            self.classifier.classify_text(&request.text, self.config.timeout),
        )
        .await
        .map_err(|_| ClassifierError::Timeout)??;

        validate(raw)
    }
}

/// Reject answers the interpreter could not make sense of.
fn validate(raw: RawClassification) -> Result<RawClassification, ClassifierError> {
    if raw.label.trim().is_empty() {
        return Err(ClassifierError::Malformed("empty label".to_string()));
    }
    if !raw.score.is_finite() || !(0.0..=1.0).contains(&raw.score) {
        return Err(ClassifierError::Malformed(format!(
            "score {} outside [0, 1]",
            raw.score
        )));
    }
    Ok(raw)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted classifier: pops one step per call, repeats the last one forever.
    struct ScriptedClassifier {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    #[derive(Clone)]
    enum Step {
        Answer(&'static str, f64),
        Hang,
        Transport,
        Throttled,
        Garbage,
    }

    impl ScriptedClassifier {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextClassifier for ScriptedClassifier {
        async fn classify_text(
            &self,
            _text: &str,
            _timeout: Duration,
        ) -> Result<RawClassification, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut steps = self.steps.lock().unwrap();
                if steps.len() > 1 {
                    steps.pop_front().unwrap()
                } else {
                    steps.front().cloned().unwrap()
                }
            };
            match step {
                Step::Answer(label, score) => Ok(RawClassification {
                    label: label.to_string(),
                    score,
                }),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    unreachable!("client timeout should fire first")
                }
                Step::Transport => Err(ClassifierError::Transport("connection reset".into())),
                Step::Throttled => Err(ClassifierError::RateLimited("429".into())),
                Step::Garbage => Err(ClassifierError::Malformed("no score".into())),
            }
        }
    }

    fn fast_config() -> ClassifierConfig {
        ClassifierConfig {
            timeout: Duration::from_millis(30),
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    fn client(steps: Vec<Step>) -> ClassifierClient<Arc<ScriptedClassifier>> {
        ClassifierClient::new(
            Arc::new(ScriptedClassifier::new(steps)),
            Arc::new(QuotaLimiter::unlimited()),
            fast_config(),
        )
    }

    #[tokio::test]
    async fn test_empty_text_short_circuits() {
        let client = client(vec![Step::Answer("toxic", 0.99)]);

        let result = client.classify("   \n\t").await;

        assert!(result.succeeded);
        assert_eq!(result.raw_label, "clean");
        assert_eq!(result.raw_score, 0.0);
        assert_eq!(client.classifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_successful_call() {
        let client = client(vec![Step::Answer("clean", 0.02)]);

        let result = client.classify("hello world").await;

        assert!(result.succeeded);
        assert_eq!(result.raw_label, "clean");
        assert_eq!(result.raw_score, 0.02);
        assert_eq!(result.error_kind, None);
        assert_eq!(client.classifier.calls(), 1);
    }

    #[tokio::test]
    async fn test_three_timeouts_give_up_with_timeout() {
        let client = client(vec![Step::Hang]);

        let result = client.classify("hello").await;

        assert!(!result.succeeded);
        assert_eq!(result.error_kind, Some(ClassifierErrorKind::Timeout));
        assert_eq!(client.classifier.calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_error_then_success() {
        let client = client(vec![
            Step::Transport,
            Step::Throttled,
            Step::Answer("toxic", 0.97),
        ]);

        let result = client.classify("something").await;

        assert!(result.succeeded);
        assert_eq!(result.raw_label, "toxic");
        assert_eq!(client.classifier.calls(), 3);
    }

    #[tokio::test]
    async fn test_last_error_kind_is_reported() {
        let client = client(vec![Step::Transport, Step::Transport, Step::Throttled]);

        let result = client.classify("something").await;

        assert_eq!(result.error_kind, Some(ClassifierErrorKind::RateLimited));
    }

    #[tokio::test]
    async fn test_malformed_is_not_retried() {
        let client = client(vec![Step::Garbage, Step::Answer("clean", 0.1)]);

        let result = client.classify("something").await;

        assert!(!result.succeeded);
        assert_eq!(result.error_kind, Some(ClassifierErrorKind::MalformedResponse));
        assert_eq!(client.classifier.calls(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_malformed() {
        for score in [1.5, -0.1, f64::NAN] {
            let client = client(vec![Step::Answer("toxic", score)]);
            let result = client.classify("something").await;
            assert_eq!(
                result.error_kind,
                Some(ClassifierErrorKind::MalformedResponse),
                "score {}",
                score
            );
        }
    }

    #[tokio::test]
    async fn test_empty_label_is_malformed() {
        let client = client(vec![Step::Answer("", 0.3)]);
        let result = client.classify("something").await;
        assert_eq!(result.error_kind, Some(ClassifierErrorKind::MalformedResponse));
    }

    #[tokio::test]
    async fn test_exhausted_quota_yields_rate_limited() {
        use crate::core::moderation::rate_limiter::RateLimitConfig;

        let limiter = Arc::new(QuotaLimiter::new(RateLimitConfig {
            capacity: 1,
            replenish_every: Duration::from_secs(1_000),
            max_concurrent: 4,
        }));
        let classifier = Arc::new(ScriptedClassifier::new(vec![Step::Answer("clean", 0.1)]));
        let client = ClassifierClient::new(classifier.clone(), limiter, fast_config());

        assert!(client.classify("first").await.succeeded);
        let second = client.classify("second").await;

        assert_eq!(second.error_kind, Some(ClassifierErrorKind::RateLimited));
        assert_eq!(classifier.calls(), 1);
    }
}
