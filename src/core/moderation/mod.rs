// Core moderation module - screens posts and comments with an external classifier.
// Leaves first: models, pure verdict/policy functions, the classifier client,
// the sink port, then the orchestrator that ties them together.

pub mod backoff;
pub mod classifier;
pub mod moderation_models;
pub mod orchestrator;
pub mod policy;
pub mod rate_limiter;
pub mod sink;
pub mod verdict;

pub use classifier::{ClassifierClient, ClassifierError, RawClassification, TextClassifier};
pub use moderation_models::*;
pub use orchestrator::ModerationOrchestrator;
pub use rate_limiter::{QuotaLimiter, RateLimitConfig};
pub use sink::{ContentVersion, DispositionSink, SinkError};
