// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "content/mod.rs"]
pub mod content;

#[path = "replies/reply_service.rs"]
pub mod replies;
