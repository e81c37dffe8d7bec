// Moderation domain models - data structures for the content screening pipeline.
//
// These are pure domain types with no HTTP or database dependencies.
// The infra layer converts classifier responses and database rows into these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Identifier of a post or comment in the record store.
pub type ContentId = u64;

/// Whether a piece of content is a top-level post or a comment on one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Post,
    Comment,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Post => "post",
            ContentKind::Comment => "comment",
        }
    }
}

impl FromStr for ContentKind {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "post" => Ok(ContentKind::Post),
            "comment" => Ok(ContentKind::Comment),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// Raised when a persisted enum column holds something we don't recognise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct UnknownValue(pub String);

/// Text handed to the pipeline by the request layer.
///
/// Never mutated. An edit produces a new value for the same `id` with a
/// higher `revision`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedContent {
    pub id: ContentId,
    pub kind: ContentKind,
    pub author_id: u64,
    /// Set for comments.
    pub parent_post_id: Option<ContentId>,
    /// Set for comments that answer another comment.
    pub reply_to_id: Option<ContentId>,
    /// Posts may carry a title; it is screened together with the body.
    pub title: Option<String>,
    pub raw_text: String,
    pub revision: u32,
    pub submitted_at: DateTime<Utc>,
}

impl SubmittedContent {
    /// The exact text sent to the classifier.
    pub fn moderation_text(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => format!("{}\n\n{}", title, self.raw_text),
            _ => self.raw_text.clone(),
        }
    }
}

/// One outbound classification call. Built per call, never persisted.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub text: String,
    pub request_id: String,
}

impl ClassificationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            request_id: format!("cls-{:016x}", rand::random::<u64>()),
        }
    }
}

/// Why the classifier client gave up on a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassifierErrorKind {
    Timeout,
    TransportError,
    RateLimited,
    MalformedResponse,
}

impl fmt::Display for ClassifierErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierErrorKind::Timeout => write!(f, "TIMEOUT"),
            ClassifierErrorKind::TransportError => write!(f, "TRANSPORT_ERROR"),
            ClassifierErrorKind::RateLimited => write!(f, "RATE_LIMITED"),
            ClassifierErrorKind::MalformedResponse => write!(f, "MALFORMED_RESPONSE"),
        }
    }
}

/// Label reported for text that never reached the classifier because it was empty.
pub const CLEAN_LABEL: &str = "clean";

/// Outcome of a single `classify` call, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub request_id: String,
    pub raw_label: String,
    /// Inappropriateness on a 0-1 scale. Meaningless when `succeeded` is false.
    pub raw_score: f64,
    pub latency_ms: u64,
    pub succeeded: bool,
    pub error_kind: Option<ClassifierErrorKind>,
}

impl ClassificationResult {
    pub fn success(
        request_id: impl Into<String>,
        label: impl Into<String>,
        score: f64,
        latency_ms: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            raw_label: label.into(),
            raw_score: score,
            latency_ms,
            succeeded: true,
            error_kind: None,
        }
    }

    /// Result for empty text: clean, zero latency, no network call made.
    pub fn empty_text(request_id: impl Into<String>) -> Self {
        Self::success(request_id, CLEAN_LABEL, 0.0, 0)
    }

    pub fn failure(request_id: impl Into<String>, kind: ClassifierErrorKind, latency_ms: u64) -> Self {
        Self {
            request_id: request_id.into(),
            raw_label: String::new(),
            raw_score: 0.0,
            latency_ms,
            succeeded: false,
            error_kind: Some(kind),
        }
    }
}

/// Closed classification of a single moderation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Clean,
    Inappropriate,
    Uncertain,
    /// The classifier could not be reached after all retries.
    Unavailable,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Clean => write!(f, "CLEAN"),
            Verdict::Inappropriate => write!(f, "INAPPROPRIATE"),
            Verdict::Uncertain => write!(f, "UNCERTAIN"),
            Verdict::Unavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

/// Persisted visibility state of a post or comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    Visible,
    Hidden,
    #[default]
    PendingReview,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Visible => "visible",
            Disposition::Hidden => "hidden",
            Disposition::PendingReview => "pending_review",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "visible" => Ok(Disposition::Visible),
            "hidden" => Ok(Disposition::Hidden),
            "pending_review" => Ok(Disposition::PendingReview),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// Output of the moderation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub disposition: Disposition,
    /// Ask the orchestrator to classify again later.
    pub retry: bool,
    /// Route the item to a human moderator.
    pub manual_review: bool,
}

/// What gets written through the disposition sink.
#[derive(Debug, Clone, PartialEq)]
pub struct DispositionRecord {
    pub disposition: Disposition,
    pub sequence_no: u64,
    /// Revision of the content this decision was made for.
    pub revision: u32,
    /// Classifier label for hidden content.
    pub reason: Option<String>,
    pub needs_manual_review: bool,
}

/// Where a single item's moderation run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationStage {
    Received,
    Classifying,
    Interpreted,
    Decided,
    RetryScheduled,
    Applied,
    /// Content was deleted or replaced by a newer revision mid-flight.
    Cancelled,
}

/// Result of one `moderate` call as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationOutcome {
    pub content_id: ContentId,
    pub disposition: Disposition,
    pub verdict: Option<Verdict>,
    pub confidence: f64,
    pub sequence_no: Option<u64>,
    pub stage: ModerationStage,
    pub retry_exhausted: bool,
}

/// Tuning for the orchestrator, the interpreter and the sink retries.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Scores at or above this are inappropriate.
    pub threshold: f64,
    /// Width of the uncertain zone below `threshold`.
    pub margin_band: f64,
    /// Consecutive UNAVAILABLE outcomes tolerated before giving up.
    pub max_retry_queue_count: u32,
    pub requeue_base_delay: Duration,
    pub requeue_max_delay: Duration,
    /// How long a successful classification is reused for the same item.
    pub result_cache_ttl: Duration,
    pub sink_max_attempts: u32,
    pub sink_base_delay: Duration,
    pub sink_max_delay: Duration,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            margin_band: 0.1,
            max_retry_queue_count: 5,
            requeue_base_delay: Duration::from_secs(2),
            requeue_max_delay: Duration::from_secs(60),
            result_cache_ttl: Duration::from_secs(60),
            sink_max_attempts: 3,
            sink_base_delay: Duration::from_millis(200),
            sink_max_delay: Duration::from_secs(5),
        }
    }
}

/// Tuning for a single classifier call and its retries.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}
