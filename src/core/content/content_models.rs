// Content domain models - posts and comments as the record store keeps them.

use crate::core::moderation::{ContentId, ContentKind, Disposition, SubmittedContent};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Per-post setting: answer visible comments with an AI-generated reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AutoReplySettings {
    #[serde(default)]
    pub enabled: bool,
    /// Seconds to wait before replying.
    #[serde(default)]
    pub delay_secs: u64,
}

/// A post or comment row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentRecord {
    pub id: ContentId,
    pub kind: ContentKind,
    pub author_id: u64,
    pub parent_post_id: Option<ContentId>,
    pub reply_to_id: Option<ContentId>,
    pub title: Option<String>,
    pub body: String,
    pub revision: u32,
    pub disposition: Disposition,
    /// Sequence number of the last applied moderation decision (0 = none yet).
    pub decision_seq: u64,
    pub block_reason: Option<String>,
    pub needs_manual_review: bool,
    pub auto_reply: AutoReplySettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentRecord {
    /// Snapshot of the current revision, ready for the moderation pipeline.
    pub fn to_submission(&self) -> SubmittedContent {
        SubmittedContent {
            id: self.id,
            kind: self.kind,
            author_id: self.author_id,
            parent_post_id: self.parent_post_id,
            reply_to_id: self.reply_to_id,
            title: self.title.clone(),
            raw_text: self.body.clone(),
            revision: self.revision,
            submitted_at: self.updated_at,
        }
    }
}

/// Everything needed to create a row. Ids, revision and timestamps are
/// assigned by the store; disposition always starts as pending review.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContent {
    pub kind: ContentKind,
    pub author_id: u64,
    pub parent_post_id: Option<ContentId>,
    pub reply_to_id: Option<ContentId>,
    pub title: Option<String>,
    pub body: String,
    pub auto_reply: AutoReplySettings,
}

impl NewContent {
    pub fn post(author_id: u64, title: Option<String>, body: String, auto_reply: AutoReplySettings) -> Self {
        Self {
            kind: ContentKind::Post,
            author_id,
            parent_post_id: None,
            reply_to_id: None,
            title,
            body,
            auto_reply,
        }
    }

    pub fn comment(
        author_id: u64,
        post_id: ContentId,
        reply_to_id: Option<ContentId>,
        body: String,
    ) -> Self {
        Self {
            kind: ContentKind::Comment,
            author_id,
            parent_post_id: Some(post_id),
            reply_to_id,
            title: None,
            body,
            auto_reply: AutoReplySettings::default(),
        }
    }
}

/// What the submitting user gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub content_id: ContentId,
    pub disposition: Disposition,
}

/// Comment volume for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCommentStats {
    pub date: NaiveDate,
    pub total_comments: u64,
    pub hidden_comments: u64,
}
