// This is the entry point of the content moderation service.
//
// **Architecture Overview:**
// - `core/` = Business logic (moderation pipeline, content rules, auto-replies)
// - `infra/` = Implementations of core traits (SQLite, classifier APIs)
// - `intake/` = The request layer; JSON lines over stdin/stdout
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Start the background pending-review sweep
// 4. Serve intake commands until stdin closes

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
mod config;
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "intake/intake_layer.rs"]
mod intake;

use crate::config::{AppConfig, ClassifierProvider};
use crate::core::content::{ContentService, ContentStore};
use crate::core::moderation::{
    ClassifierClient, DispositionSink, ModerationOrchestrator, QuotaLimiter, TextClassifier,
};
use crate::core::replies::{AutoReplyService, ReplyGenerator};
use crate::infra::ai::GeminiClient;
use crate::infra::classifier::HttpClassifier;
use crate::infra::content::{InMemoryContentStore, SqliteContentStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

/// Items younger than this are assumed to still have a live moderation task.
const SWEEP_MIN_AGE: Duration = Duration::from_secs(120);
const SWEEP_BATCH: u32 = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = AppConfig::from_env()?;

    // "memory" keeps everything in-process, handy for local runs.
    if config.database_url == "memory" {
        tracing::warn!("Using the in-memory content store; nothing will be persisted");
        serve(config, Arc::new(InMemoryContentStore::new())).await
    } else {
        let store = SqliteContentStore::new(&config.database_url).await?;
        serve(config, Arc::new(store)).await
    }
}

async fn serve<S>(config: AppConfig, store: Arc<S>) -> anyhow::Result<()>
where
    S: ContentStore + DispositionSink + 'static,
{
    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let (classifier, replies): (Box<dyn TextClassifier>, Option<Arc<dyn ReplyGenerator>>) =
        match &config.provider {
            ClassifierProvider::Gemini { api_key, model } => {
                let gemini = Arc::new(GeminiClient::new(api_key.clone(), model.clone()));
                tracing::info!("Using Gemini model {} for moderation", model);
                (
                    Box::new(Arc::clone(&gemini)) as Box<dyn TextClassifier>,
                    Some(gemini as Arc<dyn ReplyGenerator>),
                )
            }
            ClassifierProvider::Http { endpoint, api_key } => {
                tracing::info!("Using HTTP classifier at {}", endpoint);
                (
                    Box::new(HttpClassifier::new(endpoint.clone(), api_key.clone()))
                        as Box<dyn TextClassifier>,
                    None,
                )
            }
        };

    let limiter = Arc::new(QuotaLimiter::new(config.rate_limit.clone()));
    let client = ClassifierClient::new(classifier, limiter, config.classifier.clone());
    let orchestrator = Arc::new(ModerationOrchestrator::new(
        client,
        Arc::clone(&store),
        config.moderation.clone(),
    ));

    let mut service = ContentService::new(Arc::clone(&store), Arc::clone(&orchestrator));
    match (config.auto_reply_enabled, replies) {
        (true, Some(generator)) => {
            service = service.with_auto_replies(Arc::new(AutoReplyService::new(
                Arc::clone(&store),
                Arc::clone(&orchestrator),
                generator,
            )));
        }
        (true, None) => {
            tracing::warn!("Auto-replies need the Gemini provider; they are disabled");
        }
        (false, _) => {}
    }
    let service = Arc::new(service);

    // Background sweep: resume moderation for items left pending (e.g. after
    // a restart). Runs once at startup, then every interval.
    let sweeper = Arc::clone(&service);
    let interval = config.pending_sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.sweep_pending(SWEEP_MIN_AGE, SWEEP_BATCH).await {
                tracing::error!("Pending sweep failed: {}", e);
            }
        }
    });

    tracing::info!("Content moderation service ready, reading commands from stdin");
    intake::run(
        &*service,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;

    tracing::info!("Input closed, shutting down");
    Ok(())
}
