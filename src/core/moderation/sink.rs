// Disposition sink - the port through which moderation decisions are persisted.
//
// Writes are conditioned on a monotonically increasing sequence number per
// content item and on the content revision the decision was made for.

use super::moderation_models::{ContentId, Disposition, DispositionRecord};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    /// A decision with a newer (or equal) sequence number is already stored.
    /// Expected under concurrency; `stored` is the disposition that won.
    #[error("content {content_id}: sequence {attempted} is not newer than stored {current} ({stored})")]
    Conflict {
        content_id: ContentId,
        attempted: u64,
        current: u64,
        stored: Disposition,
    },

    /// The content has been re-submitted since this decision was made.
    #[error("content {content_id}: decision for revision {attempted} superseded by revision {current}")]
    Superseded {
        content_id: ContentId,
        attempted: u32,
        current: u32,
    },

    /// The content no longer exists (or was deleted).
    #[error("content {0} not found")]
    NotFound(ContentId),

    #[error("disposition sink unavailable: {0}")]
    Unavailable(String),
}

/// Revision and liveness of a content item, used for cancellation checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentVersion {
    pub revision: u32,
    pub deleted: bool,
}

#[async_trait]
pub trait DispositionSink: Send + Sync {
    /// Record a decision. Only applied when `record.sequence_no` is greater
    /// than the stored one and `record.revision` is the current revision.
    async fn set_disposition(
        &self,
        content_id: ContentId,
        record: DispositionRecord,
    ) -> Result<(), SinkError>;

    /// Current revision of the item, or `None` if it never existed.
    async fn content_version(&self, content_id: ContentId)
        -> Result<Option<ContentVersion>, SinkError>;
}
