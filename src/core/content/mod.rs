// Core content module - posts, comments and the service that routes them
// through moderation.

pub mod content_models;
pub mod content_service;
pub mod content_store;

pub use content_models::{
    AutoReplySettings, ContentRecord, DailyCommentStats, NewContent, SubmitReceipt,
};
pub use content_service::{ContentError, ContentService};
pub use content_store::{ContentStore, StoreError};
