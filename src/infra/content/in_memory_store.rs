// In-memory implementation of ContentStore and DispositionSink.
// Handy for tests and for running without a database file.

use crate::core::content::{ContentRecord, ContentStore, DailyCommentStats, NewContent, StoreError};
use crate::core::moderation::{
    ContentId, ContentKind, ContentVersion, Disposition, DispositionRecord, DispositionSink,
    SinkError,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Debug)]
struct StoredContent {
    record: ContentRecord,
    deleted: bool,
}

pub struct InMemoryContentStore {
    rows: DashMap<ContentId, StoredContent>,
    next_id: AtomicU64,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Live comments replying to `comment_id`.
    #[cfg(test)]
    pub fn replies_to(&self, comment_id: ContentId) -> Vec<ContentRecord> {
        self.rows
            .iter()
            .filter(|row| !row.deleted && row.record.reply_to_id == Some(comment_id))
            .map(|row| row.record.clone())
            .collect()
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn create(&self, content: NewContent) -> Result<ContentRecord, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let record = ContentRecord {
            id,
            kind: content.kind,
            author_id: content.author_id,
            parent_post_id: content.parent_post_id,
            reply_to_id: content.reply_to_id,
            title: content.title,
            body: content.body,
            revision: 1,
            disposition: Disposition::PendingReview,
            decision_seq: 0,
            block_reason: None,
            needs_manual_review: false,
            auto_reply: content.auto_reply,
            created_at: now,
            updated_at: now,
        };
        self.rows.insert(
            id,
            StoredContent {
                record: record.clone(),
                deleted: false,
            },
        );
        Ok(record)
    }

    async fn get(&self, id: ContentId) -> Result<Option<ContentRecord>, StoreError> {
        Ok(self
            .rows
            .get(&id)
            .filter(|row| !row.deleted)
            .map(|row| row.record.clone()))
    }

    async fn update_text(
        &self,
        id: ContentId,
        title: Option<String>,
        body: String,
    ) -> Result<Option<ContentRecord>, StoreError> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(None);
        };
        if row.deleted {
            return Ok(None);
        }

        let record = &mut row.record;
        if record.kind == ContentKind::Post {
            record.title = title;
        }
        record.body = body;
        record.revision += 1;
        record.disposition = Disposition::PendingReview;
        record.block_reason = None;
        record.needs_manual_review = false;
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn delete(&self, id: ContentId) -> Result<bool, StoreError> {
        match self.rows.get_mut(&id) {
            Some(mut row) if !row.deleted => {
                row.deleted = true;
                row.record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_ids(
        &self,
        updated_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ContentId>, StoreError> {
        let mut pending: Vec<(DateTime<Utc>, ContentId)> = self
            .rows
            .iter()
            .filter(|row| {
                !row.deleted
                    && row.record.disposition == Disposition::PendingReview
                    && !row.record.needs_manual_review
                    && row.record.updated_at < updated_before
            })
            .map(|row| (row.record.updated_at, row.record.id))
            .collect();
        pending.sort();

        Ok(pending
            .into_iter()
            .take(limit as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn comment_counts(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyCommentStats>, StoreError> {
        let mut days: BTreeMap<NaiveDate, (u64, u64)> = BTreeMap::new();
        for row in self.rows.iter() {
            let record = &row.record;
            if row.deleted || record.kind != ContentKind::Comment {
                continue;
            }
            let date = record.created_at.date_naive();
            if date < from || date > to {
                continue;
            }
            let entry = days.entry(date).or_default();
            entry.0 += 1;
            if record.disposition == Disposition::Hidden {
                entry.1 += 1;
            }
        }

        Ok(days
            .into_iter()
            .map(|(date, (total, hidden))| DailyCommentStats {
                date,
                total_comments: total,
                hidden_comments: hidden,
            })
            .collect())
    }
}

#[async_trait]
impl DispositionSink for InMemoryContentStore {
    async fn set_disposition(
        &self,
        content_id: ContentId,
        record: DispositionRecord,
    ) -> Result<(), SinkError> {
        let mut row = match self.rows.get_mut(&content_id) {
            Some(row) if !row.deleted => row,
            _ => return Err(SinkError::NotFound(content_id)),
        };

        let current = &mut row.record;
        if record.revision != current.revision {
            return Err(SinkError::Superseded {
                content_id,
                attempted: record.revision,
                current: current.revision,
            });
        }
        if record.sequence_no <= current.decision_seq {
            return Err(SinkError::Conflict {
                content_id,
                attempted: record.sequence_no,
                current: current.decision_seq,
                stored: current.disposition,
            });
        }

        current.disposition = record.disposition;
        current.decision_seq = record.sequence_no;
        current.block_reason = record.reason;
        current.needs_manual_review = record.needs_manual_review;
        current.updated_at = Utc::now();
        Ok(())
    }

    async fn content_version(
        &self,
        content_id: ContentId,
    ) -> Result<Option<ContentVersion>, SinkError> {
        Ok(self.rows.get(&content_id).map(|row| ContentVersion {
            revision: row.record.revision,
            deleted: row.deleted,
        }))
    }
}
