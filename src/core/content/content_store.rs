use super::content_models::{ContentRecord, DailyCommentStats, NewContent};
use crate::core::moderation::ContentId;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Corrupt row for content {id}: {reason}")]
    Corrupt { id: ContentId, reason: String },
}

/// Record store for posts and comments.
///
/// Deleted rows are invisible to every method here; the disposition sink
/// still reports them as deleted so in-flight moderation can cancel.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn create(&self, content: NewContent) -> Result<ContentRecord, StoreError>;

    async fn get(&self, id: ContentId) -> Result<Option<ContentRecord>, StoreError>;

    /// Store a new revision of the text. Resets the disposition to pending
    /// review and clears any previous block reason.
    async fn update_text(
        &self,
        id: ContentId,
        title: Option<String>,
        body: String,
    ) -> Result<Option<ContentRecord>, StoreError>;

    /// Soft delete. Returns false if there was nothing to delete.
    async fn delete(&self, id: ContentId) -> Result<bool, StoreError>;

    /// Items still pending review, not flagged for a human, last touched
    /// before `updated_before`. Oldest first.
    async fn pending_ids(
        &self,
        updated_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ContentId>, StoreError>;

    /// Comment counts per creation day in `[from, to]`. Days without
    /// comments may be missing.
    async fn comment_counts(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyCommentStats>, StoreError>;
}
