// Intake protocol - one JSON object per line in, one JSON object per line out.

use crate::core::content::{AutoReplySettings, ContentError};
use crate::core::moderation::ContentId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SubmitPost {
        author_id: u64,
        #[serde(default)]
        title: Option<String>,
        body: String,
        #[serde(default)]
        auto_reply: AutoReplySettings,
    },
    SubmitComment {
        author_id: u64,
        post_id: ContentId,
        #[serde(default)]
        reply_to_id: Option<ContentId>,
        body: String,
    },
    Edit {
        content_id: ContentId,
        #[serde(default)]
        title: Option<String>,
        body: String,
    },
    Delete {
        content_id: ContentId,
    },
    Remoderate {
        content_id: ContentId,
    },
    Disposition {
        content_id: ContentId,
    },
    Get {
        content_id: ContentId,
    },
    CommentStats {
        from: NaiveDate,
        to: NaiveDate,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }

    /// Stable error codes for service failures.
    pub fn from_error(err: &ContentError) -> Self {
        let code = match err {
            ContentError::EmptyText(_)
            | ContentError::InvalidRange { .. }
            | ContentError::RangeTooLong(_) => "invalid_input",
            ContentError::NotFound(_) | ContentError::ParentNotFound(_) => "not_found",
            ContentError::ParentHidden(_) => "forbidden",
            ContentError::Store(_) | ContentError::Sink(_) => "internal",
        };
        Self::error(code, err.to_string())
    }
}

pub fn parse_command(line: &str) -> Result<Command, Reply> {
    serde_json::from_str(line).map_err(|e| Reply::error("bad_request", e.to_string()))
}
