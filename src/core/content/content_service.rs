// Content service - the request-layer entry points for posts and comments.
//
// Submissions are acknowledged immediately as PENDING_REVIEW; moderation runs
// in a background task and callers poll `get_disposition`. Moderation
// problems never turn into submission errors. Only validation does.

use super::content_models::{
    AutoReplySettings, ContentRecord, DailyCommentStats, NewContent, SubmitReceipt,
};
use super::content_store::{ContentStore, StoreError};
use crate::core::moderation::{
    ContentId, ContentKind, Disposition, DispositionRecord, DispositionSink,
    ModerationOrchestrator, SinkError, SubmittedContent, TextClassifier,
};
use crate::core::replies::AutoReplyService;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Longest range the comment analytics will expand day by day.
const MAX_STATS_DAYS: i64 = 366;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("{0} cannot be empty")]
    EmptyText(&'static str),
    #[error("Content {0} not found")]
    NotFound(ContentId),
    #[error("Parent content {0} not found")]
    ParentNotFound(ContentId),
    #[error("You cannot comment on blocked content ({0})")]
    ParentHidden(ContentId),
    #[error("Invalid date range: {from} is after {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },
    #[error("Date range too long: {0} days")]
    RangeTooLong(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

pub struct ContentService<S, C>
where
    S: ContentStore + DispositionSink + 'static,
    C: TextClassifier + 'static,
{
    store: Arc<S>,
    orchestrator: Arc<ModerationOrchestrator<C, S>>,
    replies: Option<Arc<AutoReplyService<S, C>>>,
    /// Live moderation tasks per item. The sweep leaves these alone.
    in_flight: Arc<DashMap<ContentId, usize>>,
}

impl<S, C> ContentService<S, C>
where
    S: ContentStore + DispositionSink + 'static,
    C: TextClassifier + 'static,
{
    pub fn new(store: Arc<S>, orchestrator: Arc<ModerationOrchestrator<C, S>>) -> Self {
        Self {
            store,
            orchestrator,
            replies: None,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Enable AI replies for posts that opt in.
    pub fn with_auto_replies(mut self, replies: Arc<AutoReplyService<S, C>>) -> Self {
        self.replies = Some(replies);
        self
    }

    pub async fn submit_post(
        &self,
        author_id: u64,
        title: Option<String>,
        body: String,
        auto_reply: AutoReplySettings,
    ) -> Result<SubmitReceipt, ContentError> {
        let title = validate_title(title)?;
        let body = validate_body(body)?;

        let record = self
            .store
            .create(NewContent::post(author_id, title, body, auto_reply))
            .await?;
        tracing::debug!(content_id = record.id, author_id, "Post submitted");

        self.spawn_moderation(record.to_submission());
        Ok(receipt(&record))
    }

    pub async fn submit_comment(
        &self,
        author_id: u64,
        post_id: ContentId,
        reply_to_id: Option<ContentId>,
        body: String,
    ) -> Result<SubmitReceipt, ContentError> {
        let body = validate_body(body)?;

        let post = self
            .store
            .get(post_id)
            .await?
            .filter(|p| p.kind == ContentKind::Post)
            .ok_or(ContentError::ParentNotFound(post_id))?;
        if post.disposition == Disposition::Hidden {
            return Err(ContentError::ParentHidden(post_id));
        }

        if let Some(parent_id) = reply_to_id {
            let parent = self
                .store
                .get(parent_id)
                .await?
                .filter(|c| c.kind == ContentKind::Comment && c.parent_post_id == Some(post_id))
                .ok_or(ContentError::ParentNotFound(parent_id))?;
            if parent.disposition == Disposition::Hidden {
                return Err(ContentError::ParentHidden(parent_id));
            }
        }

        let record = self
            .store
            .create(NewContent::comment(author_id, post_id, reply_to_id, body))
            .await?;
        tracing::debug!(content_id = record.id, post_id, author_id, "Comment submitted");

        self.spawn_moderation(record.to_submission());
        Ok(receipt(&record))
    }

    pub async fn get(&self, id: ContentId) -> Result<ContentRecord, ContentError> {
        self.store.get(id).await?.ok_or(ContentError::NotFound(id))
    }

    pub async fn get_disposition(&self, id: ContentId) -> Result<Disposition, ContentError> {
        Ok(self.get(id).await?.disposition)
    }

    /// Re-submit new text for an existing post or comment.
    pub async fn edit(
        &self,
        id: ContentId,
        title: Option<String>,
        body: String,
    ) -> Result<SubmitReceipt, ContentError> {
        let title = validate_title(title)?;
        let body = validate_body(body)?;

        let record = self
            .store
            .update_text(id, title, body)
            .await?
            .ok_or(ContentError::NotFound(id))?;
        tracing::debug!(content_id = id, revision = record.revision, "Content edited");

        self.spawn_moderation(record.to_submission());
        Ok(receipt(&record))
    }

    pub async fn delete(&self, id: ContentId) -> Result<(), ContentError> {
        if self.store.delete(id).await? {
            tracing::debug!(content_id = id, "Content deleted");
            Ok(())
        } else {
            Err(ContentError::NotFound(id))
        }
    }

    /// Run moderation again from PENDING_REVIEW. Safe to call repeatedly.
    pub async fn remoderate(&self, id: ContentId) -> Result<SubmitReceipt, ContentError> {
        let record = self.get(id).await?;

        let reset = DispositionRecord {
            disposition: Disposition::PendingReview,
            sequence_no: self.orchestrator.next_sequence(),
            revision: record.revision,
            reason: None,
            needs_manual_review: false,
        };
        match self.store.set_disposition(id, reset).await {
            Ok(()) | Err(SinkError::Conflict { .. }) => {}
            Err(SinkError::NotFound(_)) => return Err(ContentError::NotFound(id)),
            // An edit raced us; it schedules its own moderation.
            Err(SinkError::Superseded { .. }) => {
                return Ok(SubmitReceipt {
                    content_id: id,
                    disposition: Disposition::PendingReview,
                })
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(content_id = id, "Re-moderation requested");
        self.spawn_moderation(record.to_submission());
        Ok(SubmitReceipt {
            content_id: id,
            disposition: Disposition::PendingReview,
        })
    }

    /// Comment totals and hidden counts per day, every day in `[from, to]`
    /// present even when empty.
    pub async fn comment_stats(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyCommentStats>, ContentError> {
        if from > to {
            return Err(ContentError::InvalidRange { from, to });
        }
        let days = (to - from).num_days() + 1;
        if days > MAX_STATS_DAYS {
            return Err(ContentError::RangeTooLong(days));
        }

        let counts = self.store.comment_counts(from, to).await?;
        Ok(from
            .iter_days()
            .take(days as usize)
            .map(|date| {
                counts
                    .iter()
                    .find(|c| c.date == date)
                    .cloned()
                    .unwrap_or(DailyCommentStats {
                        date,
                        total_comments: 0,
                        hidden_comments: 0,
                    })
            })
            .collect())
    }

    /// Pick up items that are still pending after `min_age` (for example
    /// because the process restarted mid-moderation) and moderate them again.
    pub async fn sweep_pending(&self, min_age: Duration, limit: u32) -> Result<usize, ContentError> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(min_age).unwrap_or_else(|_| ChronoDuration::zero());
        let ids = self.store.pending_ids(cutoff, limit).await?;

        let mut resumed = 0;
        for id in ids {
            if self.in_flight.contains_key(&id) {
                tracing::debug!(content_id = id, "Moderation already running, not resuming");
                continue;
            }
            if let Some(record) = self.store.get(id).await? {
                self.spawn_moderation(record.to_submission());
                resumed += 1;
            }
        }
        if resumed > 0 {
            tracing::info!(resumed, "Resumed moderation for pending content");
        }
        Ok(resumed)
    }

    fn spawn_moderation(&self, content: SubmittedContent) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let replies = self.replies.clone();
        // Registered before the task starts so a sweep right after cannot race it.
        let guard = InFlightGuard::register(&self.in_flight, content.id);
        tokio::spawn(async move {
            let _guard = guard;
            let outcome = orchestrator.moderate(&content).await;
            if let Some(replies) = replies {
                if outcome.disposition == Disposition::Visible && content.kind == ContentKind::Comment
                {
                    replies.on_comment_visible(content);
                }
            }
        });
    }
}

/// Counts one running moderation task; dropping it (even on panic) releases the count.
struct InFlightGuard {
    registry: Arc<DashMap<ContentId, usize>>,
    content_id: ContentId,
}

impl InFlightGuard {
    fn register(registry: &Arc<DashMap<ContentId, usize>>, content_id: ContentId) -> Self {
        *registry.entry(content_id).or_insert(0) += 1;
        Self {
            registry: Arc::clone(registry),
            content_id,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        // An edit can start a second run while the first is still going.
        self.registry.remove_if_mut(&self.content_id, |_, running| {
            *running -= 1;
            *running == 0
        });
    }
}

fn receipt(record: &ContentRecord) -> SubmitReceipt {
    SubmitReceipt {
        content_id: record.id,
        disposition: record.disposition,
    }
}

fn validate_body(body: String) -> Result<String, ContentError> {
    if body.trim().is_empty() {
        return Err(ContentError::EmptyText("Content"));
    }
    Ok(body)
}

fn validate_title(title: Option<String>) -> Result<Option<String>, ContentError> {
    match title {
        Some(t) if t.trim().is_empty() => Err(ContentError::EmptyText("Title")),
        other => Ok(other),
    }
}

// ============================================================================
// TESTS
// ============================================================================
