// Auto-reply - post authors can let an AI answer comments on their posts.
//
// Only comments that settled VISIBLE get a reply, and never the post
// author's own comments (which also covers the generated replies themselves).
// The reply is stored as a comment by the post author and moderated like any
// other comment.

use crate::core::content::{ContentRecord, ContentStore, NewContent, StoreError};
use crate::core::moderation::{
    ContentId, ContentKind, Disposition, DispositionSink, ModerationOrchestrator,
    SubmittedContent, TextClassifier,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("Reply generation failed: {0}")]
    Provider(String),
    #[error("Generator returned an empty reply")]
    Empty,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Produces reply text for a comment, given the post it was left on.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate_reply(&self, post: &str, comment: &str) -> Result<String, ReplyError>;
}

pub struct AutoReplyService<S, C>
where
    S: ContentStore + DispositionSink + 'static,
    C: TextClassifier + 'static,
{
    store: Arc<S>,
    orchestrator: Arc<ModerationOrchestrator<C, S>>,
    generator: Arc<dyn ReplyGenerator>,
}

impl<S, C> AutoReplyService<S, C>
where
    S: ContentStore + DispositionSink + 'static,
    C: TextClassifier + 'static,
{
    pub fn new(
        store: Arc<S>,
        orchestrator: Arc<ModerationOrchestrator<C, S>>,
        generator: Arc<dyn ReplyGenerator>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            generator,
        }
    }

    /// Hook for comments that just became visible. Runs in the background.
    pub fn on_comment_visible(self: &Arc<Self>, comment: SubmittedContent) {
        if comment.kind != ContentKind::Comment {
            return;
        }
        let service = Arc::clone(self);
        tokio::spawn(async move {
            match service.reply_to(&comment).await {
                Ok(Some(reply_id)) => {
                    tracing::info!(comment_id = comment.id, reply_id, "Auto-reply posted")
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(comment_id = comment.id, "Auto-reply failed: {}", e),
            }
        });
    }

    /// Generate and store a reply if the post asks for one. Returns the id of
    /// the stored reply.
    pub async fn reply_to(&self, comment: &SubmittedContent) -> Result<Option<ContentId>, ReplyError> {
        let Some(post_id) = comment.parent_post_id else {
            return Ok(None);
        };
        let Some(post) = self.store.get(post_id).await? else {
            return Ok(None);
        };
        if !post.auto_reply.enabled || post.author_id == comment.author_id {
            return Ok(None);
        }

        if post.auto_reply.delay_secs > 0 {
            tokio::time::sleep(Duration::from_secs(post.auto_reply.delay_secs)).await;
        }

        // The comment may have been edited, hidden or deleted while we waited.
        if !self.still_visible(comment).await? {
            return Ok(None);
        }

        let post_text = post.to_submission().moderation_text();
        let reply = self
            .generator
            .generate_reply(&post_text, &comment.raw_text)
            .await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(ReplyError::Empty);
        }

        let stored = self
            .store
            .create(NewContent::comment(
                post.author_id,
                post.id,
                Some(comment.id),
                reply.to_string(),
            ))
            .await?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let submission = stored.to_submission();
        tokio::spawn(async move {
            orchestrator.moderate(&submission).await;
        });

        Ok(Some(stored.id))
    }

    async fn still_visible(&self, comment: &SubmittedContent) -> Result<bool, ReplyError> {
        Ok(matches!(
            self.store.get(comment.id).await?,
            Some(ContentRecord { revision, disposition: Disposition::Visible, .. })
                if revision == comment.revision
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::content::AutoReplySettings;
    use crate::core::moderation::{
        ClassifierClient, ClassifierConfig, ClassifierError, ModerationConfig, QuotaLimiter,
        RawClassification,
    };
    use crate::infra::content::InMemoryContentStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Clean;

    #[async_trait]
    impl TextClassifier for Clean {
        async fn classify_text(
            &self,
            _text: &str,
            _timeout: Duration,
        ) -> Result<RawClassification, ClassifierError> {
            Ok(RawClassification {
                label: "clean".into(),
                score: 0.0,
            })
        }
    }

    struct Echo {
        calls: AtomicUsize,
        reply: &'static str,
    }

    #[async_trait]
    impl ReplyGenerator for Echo {
        async fn generate_reply(&self, _post: &str, _comment: &str) -> Result<String, ReplyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    struct Fixture {
        store: Arc<InMemoryContentStore>,
        generator: Arc<Echo>,
        service: AutoReplyService<InMemoryContentStore, Clean>,
    }

    fn fixture(reply: &'static str) -> Fixture {
        let store = Arc::new(InMemoryContentStore::new());
        let client = ClassifierClient::new(
            Clean,
            Arc::new(QuotaLimiter::unlimited()),
            ClassifierConfig::default(),
        );
        let orchestrator = Arc::new(ModerationOrchestrator::new(
            client,
            store.clone(),
            ModerationConfig::default(),
        ));
        let generator = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            reply,
        });
        let service = AutoReplyService::new(store.clone(), orchestrator, generator.clone());
        Fixture {
            store,
            generator,
            service,
        }
    }

    /// A post by user 1 and a visible comment on it by `commenter`.
    async fn thread(f: &Fixture, enabled: bool, commenter: u64) -> SubmittedContent {
        let post = f
            .store
            .create(NewContent::post(
                1,
                None,
                "post".into(),
                AutoReplySettings {
                    enabled,
                    delay_secs: 0,
                },
            ))
            .await
            .unwrap();
        let comment = f
            .store
            .create(NewContent::comment(commenter, post.id, None, "question?".into()))
            .await
            .unwrap();
        f.store
            .set_disposition(
                comment.id,
                crate::core::moderation::DispositionRecord {
                    disposition: Disposition::Visible,
                    sequence_no: 1,
                    revision: 1,
                    reason: None,
                    needs_manual_review: false,
                },
            )
            .await
            .unwrap();
        comment.to_submission()
    }

    #[tokio::test]
    async fn test_reply_is_stored_as_post_author() {
        let f = fixture("  Glad you asked!  ");
        let comment = thread(&f, true, 2).await;

        let reply_id = f.service.reply_to(&comment).await.unwrap().unwrap();

        let reply = f.store.get(reply_id).await.unwrap().unwrap();
        assert_eq!(reply.author_id, 1);
        assert_eq!(reply.reply_to_id, Some(comment.id));
        assert_eq!(reply.body, "Glad you asked!");
    }

    #[tokio::test]
    async fn test_skips_when_disabled_or_own_comment() {
        let f = fixture("hi");

        let disabled = thread(&f, false, 2).await;
        assert_eq!(f.service.reply_to(&disabled).await.unwrap(), None);

        let own = thread(&f, true, 1).await;
        assert_eq!(f.service.reply_to(&own).await.unwrap(), None);

        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_skips_comment_hidden_meanwhile() {
        let f = fixture("hi");
        let comment = thread(&f, true, 2).await;
        f.store
            .set_disposition(
                comment.id,
                crate::core::moderation::DispositionRecord {
                    disposition: Disposition::Hidden,
                    sequence_no: 2,
                    revision: 1,
                    reason: Some("remoderated".into()),
                    needs_manual_review: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(f.service.reply_to(&comment).await.unwrap(), None);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_reply_is_an_error() {
        let f = fixture("   ");
        let comment = thread(&f, true, 2).await;

        assert!(matches!(
            f.service.reply_to(&comment).await,
            Err(ReplyError::Empty)
        ));
    }
}
