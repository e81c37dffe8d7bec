// Moderation orchestrator - runs one content item through the pipeline.
//
// RECEIVED -> CLASSIFYING -> INTERPRETED -> DECIDED -> APPLIED
//                  ^                           |
//                  +----- RETRY_SCHEDULED <----+   (classifier unavailable,
//                                                   or sink unavailable)
//
// Any stage may end in CANCELLED when the item is deleted or re-submitted.
// Only the classifier call and the sink calls suspend; interpretation and the
// policy decision are pure.

use super::backoff::Backoff;
use super::classifier::{ClassifierClient, TextClassifier};
use super::moderation_models::{
    ClassificationResult, ContentId, Disposition, DispositionRecord, ModerationConfig,
    ModerationOutcome, ModerationStage, SubmittedContent, Verdict,
};
use super::policy::decide;
use super::sink::{DispositionSink, SinkError};
use super::verdict::interpret;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Monotonic source of decision sequence numbers.
///
/// Seeded from the wall clock in microseconds so numbers keep increasing
/// across restarts.
pub struct SequenceGenerator {
    next: AtomicU64,
}

impl SequenceGenerator {
    pub fn from_clock() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(1);
        Self::starting_at(micros)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

struct CachedResult {
    result: ClassificationResult,
    cached_at: Instant,
}

/// One cell per (content id, revision). Holding the lock is what makes a
/// classifier call "in flight" for that item.
type ResultCell = Arc<Mutex<Option<CachedResult>>>;

enum ApplyOutcome {
    Applied,
    /// A newer decision was already stored; it is what callers must see.
    Stale { current: u64, stored: Disposition },
    Cancelled,
    Unavailable(String),
}

pub struct ModerationOrchestrator<C: TextClassifier, K: DispositionSink> {
    client: ClassifierClient<C>,
    sink: Arc<K>,
    config: ModerationConfig,
    results: DashMap<(ContentId, u32), ResultCell>,
    sequence: SequenceGenerator,
    requeue_backoff: Backoff,
    sink_backoff: Backoff,
}

impl<C: TextClassifier, K: DispositionSink> ModerationOrchestrator<C, K> {
    pub fn new(client: ClassifierClient<C>, sink: Arc<K>, config: ModerationConfig) -> Self {
        let requeue_backoff = Backoff::new(config.requeue_base_delay, config.requeue_max_delay);
        let sink_backoff = Backoff::new(config.sink_base_delay, config.sink_max_delay);
        Self {
            client,
            sink,
            config,
            results: DashMap::new(),
            sequence: SequenceGenerator::from_clock(),
            requeue_backoff,
            sink_backoff,
        }
    }

    /// Next decision sequence number. Also used by re-moderation to reset an
    /// item to pending through the sink.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.next()
    }

    /// Run `content` through the pipeline and persist the outcome.
    pub async fn moderate(&self, content: &SubmittedContent) -> ModerationOutcome {
        self.evict_expired();

        let mut stage = ModerationStage::Received;
        let mut requeues = 0u32;
        let max_requeues = self.config.max_retry_queue_count.max(1);

        loop {
            if self.is_cancelled(content).await {
                return self.cancelled(content, &mut stage);
            }

            self.advance(content.id, &mut stage, ModerationStage::Classifying);
            let result = self.classify_cached(content).await;

            let (verdict, confidence) =
                interpret(&result, self.config.threshold, self.config.margin_band);
            self.advance(content.id, &mut stage, ModerationStage::Interpreted);

            let decision = decide(verdict);
            self.advance(content.id, &mut stage, ModerationStage::Decided);

            if decision.retry {
                requeues += 1;
                if requeues >= max_requeues {
                    return self.give_up(content, &result, requeues).await;
                }
                self.schedule_retry(content.id, &mut stage, requeues).await;
                continue;
            }

            // The classifier call may have taken a while.
            if self.is_cancelled(content).await {
                return self.cancelled(content, &mut stage);
            }

            let sequence_no = self.sequence.next();
            let record = DispositionRecord {
                disposition: decision.disposition,
                sequence_no,
                revision: content.revision,
                reason: match verdict {
                    Verdict::Inappropriate | Verdict::Uncertain => Some(result.raw_label.clone()),
                    _ => None,
                },
                needs_manual_review: decision.manual_review,
            };

            match self.apply(content.id, record).await {
                ApplyOutcome::Stale { current, stored } => {
                    self.advance(content.id, &mut stage, ModerationStage::Applied);
                    tracing::info!(
                        content_id = content.id,
                        revision = content.revision,
                        %verdict,
                        disposition = %stored,
                        sequence_no = current,
                        "Newer moderation decision already stored"
                    );
                    return ModerationOutcome {
                        content_id: content.id,
                        disposition: stored,
                        verdict: Some(verdict),
                        confidence,
                        sequence_no: Some(current),
                        stage,
                        retry_exhausted: false,
                    };
                }
                ApplyOutcome::Applied => {
                    self.advance(content.id, &mut stage, ModerationStage::Applied);
                    tracing::info!(
                        content_id = content.id,
                        revision = content.revision,
                        %verdict,
                        confidence,
                        disposition = %decision.disposition,
                        sequence_no,
                        "Moderation decision applied"
                    );
                    return ModerationOutcome {
                        content_id: content.id,
                        disposition: decision.disposition,
                        verdict: Some(verdict),
                        confidence,
                        sequence_no: Some(sequence_no),
                        stage,
                        retry_exhausted: false,
                    };
                }
                ApplyOutcome::Cancelled => return self.cancelled(content, &mut stage),
                ApplyOutcome::Unavailable(reason) => {
                    // The successful classification stays cached, so the next
                    // round only repeats the write.
                    requeues += 1;
                    tracing::warn!(
                        content_id = content.id,
                        requeues,
                        %reason,
                        "Disposition sink unavailable, re-queueing"
                    );
                    if requeues >= max_requeues {
                        return self.give_up(content, &result, requeues).await;
                    }
                    self.schedule_retry(content.id, &mut stage, requeues).await;
                }
            }
        }
    }

    /// Classify through the per-item cache. Concurrent callers for the same
    /// item wait on the same cell, so at most one classifier call is in flight.
    async fn classify_cached(&self, content: &SubmittedContent) -> ClassificationResult {
        let cell = self
            .results
            .entry((content.id, content.revision))
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut slot = cell.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.cached_at.elapsed() < self.config.result_cache_ttl {
                tracing::debug!(content_id = content.id, "Reusing cached classification");
                return cached.result.clone();
            }
        }

        let result = self.client.classify(&content.moderation_text()).await;
        // Failures are never cached; a retry must reach the classifier again.
        *slot = result.succeeded.then(|| CachedResult {
            result: result.clone(),
            cached_at: Instant::now(),
        });
        result
    }

    fn evict_expired(&self) {
        let ttl = self.config.result_cache_ttl;
        self.results.retain(|_, cell| {
            if Arc::strong_count(cell) > 1 {
                return true;
            }
            match cell.try_lock() {
                Ok(slot) => slot
                    .as_ref()
                    .map(|cached| cached.cached_at.elapsed() < ttl)
                    .unwrap_or(false),
                Err(_) => true,
            }
        });
    }

    async fn is_cancelled(&self, content: &SubmittedContent) -> bool {
        match self.sink.content_version(content.id).await {
            Ok(Some(version)) => version.deleted || version.revision > content.revision,
            Ok(None) => true,
            Err(err) => {
                // The write is conditioned on the revision anyway.
                tracing::debug!(content_id = content.id, error = %err, "Could not check content version");
                false
            }
        }
    }

    async fn apply(&self, content_id: ContentId, record: DispositionRecord) -> ApplyOutcome {
        let max_attempts = self.config.sink_max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.sink.set_disposition(content_id, record.clone()).await {
                Ok(()) => return ApplyOutcome::Applied,
                Err(SinkError::Conflict { current, stored, .. }) => {
                    tracing::debug!(
                        content_id,
                        attempted = record.sequence_no,
                        current,
                        "Newer decision already stored, dropping write"
                    );
                    return ApplyOutcome::Stale { current, stored };
                }
                Err(err @ (SinkError::Superseded { .. } | SinkError::NotFound(_))) => {
                    tracing::debug!(content_id, error = %err, "Decision no longer applies");
                    return ApplyOutcome::Cancelled;
                }
                Err(SinkError::Unavailable(reason)) if attempt < max_attempts => {
                    let delay = self.sink_backoff.delay(attempt);
                    tracing::warn!(
                        content_id,
                        attempt,
                        max_attempts,
                        %reason,
                        ?delay,
                        "Disposition write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(SinkError::Unavailable(reason)) => return ApplyOutcome::Unavailable(reason),
            }
        }
    }

    async fn schedule_retry(&self, content_id: ContentId, stage: &mut ModerationStage, requeues: u32) {
        self.advance(content_id, stage, ModerationStage::RetryScheduled);
        let delay = self.requeue_backoff.delay(requeues);
        tracing::debug!(content_id, requeues, ?delay, "Moderation retry scheduled");
        tokio::time::sleep(delay).await;
    }

    /// Stop automating: leave the item pending and flag it for a human.
    async fn give_up(
        &self,
        content: &SubmittedContent,
        last: &ClassificationResult,
        requeues: u32,
    ) -> ModerationOutcome {
        let cause = last
            .error_kind
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "SINK_UNAVAILABLE".to_string());

        tracing::error!(
            content_id = content.id,
            revision = content.revision,
            requeues,
            %cause,
            "RETRY_EXHAUSTED: content left pending for manual review"
        );

        let sequence_no = self.sequence.next();
        let record = DispositionRecord {
            disposition: Disposition::PendingReview,
            sequence_no,
            revision: content.revision,
            reason: Some(format!("RETRY_EXHAUSTED ({})", cause)),
            needs_manual_review: true,
        };
        if let ApplyOutcome::Unavailable(reason) = self.apply(content.id, record).await {
            tracing::error!(content_id = content.id, %reason, "Could not flag content for manual review");
        }

        ModerationOutcome {
            content_id: content.id,
            disposition: Disposition::PendingReview,
            verdict: Some(Verdict::Unavailable).filter(|_| !last.succeeded),
            confidence: 0.0,
            sequence_no: Some(sequence_no),
            stage: ModerationStage::Decided,
            retry_exhausted: true,
        }
    }

    fn cancelled(&self, content: &SubmittedContent, stage: &mut ModerationStage) -> ModerationOutcome {
        self.advance(content.id, stage, ModerationStage::Cancelled);
        ModerationOutcome {
            content_id: content.id,
            disposition: Disposition::PendingReview,
            verdict: None,
            confidence: 0.0,
            sequence_no: None,
            stage: *stage,
            retry_exhausted: false,
        }
    }

    fn advance(&self, content_id: ContentId, stage: &mut ModerationStage, next: ModerationStage) {
        tracing::debug!(content_id, from = ?*stage, to = ?next, "Moderation stage");
        *stage = next;
    }
}

// ============================================================================
// TESTS
// ============================================================================
