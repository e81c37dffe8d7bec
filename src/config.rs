// Application configuration, read from the environment (and `.env` via dotenv).

use crate::core::moderation::{ClassifierConfig, ModerationConfig, RateLimitConfig};
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Classifier calls need at least a millisecond and never more than five minutes.
const CLASSIFIER_TIMEOUT_MS: RangeInclusive<u64> = 1..=300_000;
/// Backoff and requeue delays are capped at an hour.
const DELAY_MS: RangeInclusive<u64> = 0..=3_600_000;
/// Second-granularity intervals are capped at a day.
const INTERVAL_SECS: RangeInclusive<u64> = 1..=86_400;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("{key} is out of range: {reason}")]
    OutOfRange { key: &'static str, reason: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierProvider {
    Gemini { api_key: String, model: String },
    Http { endpoint: String, api_key: Option<String> },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub provider: ClassifierProvider,
    pub classifier: ClassifierConfig,
    pub rate_limit: RateLimitConfig,
    pub moderation: ModerationConfig,
    pub auto_reply_enabled: bool,
    pub pending_sweep_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get("CLASSIFIER_PROVIDER")
            .unwrap_or_else(|| "gemini".to_string())
            .to_lowercase()
            .as_str()
        {
            "gemini" => ClassifierProvider::Gemini {
                api_key: get("GEMINI_API_KEY").ok_or(ConfigError::Missing("GEMINI_API_KEY"))?,
                model: get("GEMINI_MODEL").unwrap_or_else(|| "gemini-1.5-flash".to_string()),
            },
            "http" => ClassifierProvider::Http {
                endpoint: get("CLASSIFIER_ENDPOINT")
                    .ok_or(ConfigError::Missing("CLASSIFIER_ENDPOINT"))?,
                api_key: get("CLASSIFIER_API_KEY"),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "CLASSIFIER_PROVIDER",
                    value: other.to_string(),
                })
            }
        };

        let classifier = ClassifierConfig {
            timeout: millis(&get, "CLASSIFIER_TIMEOUT_MS", 5_000, CLASSIFIER_TIMEOUT_MS)?,
            max_attempts: at_least_one(&get, "CLASSIFIER_MAX_ATTEMPTS", 3)?,
            base_backoff: millis(&get, "CLASSIFIER_BACKOFF_MS", 500, DELAY_MS)?,
            max_backoff: millis(&get, "CLASSIFIER_MAX_BACKOFF_MS", 8_000, DELAY_MS)?,
        };

        let rate_limit = RateLimitConfig::per_minute(
            at_least_one(&get, "CLASSIFIER_RATE_LIMIT_PER_MINUTE", 60)?,
            at_least_one::<_, usize>(&get, "CLASSIFIER_MAX_CONCURRENCY", 4)?,
        );

        let threshold: f64 = parse(&get, "MODERATION_THRESHOLD", 0.5)?;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::OutOfRange {
                key: "MODERATION_THRESHOLD",
                reason: format!("{} is not in (0, 1]", threshold),
            });
        }
        let margin_band: f64 = parse(&get, "MODERATION_MARGIN_BAND", 0.1)?;
        if !(margin_band >= 0.0 && margin_band <= threshold) {
            return Err(ConfigError::OutOfRange {
                key: "MODERATION_MARGIN_BAND",
                reason: format!("{} is not in [0, {}]", margin_band, threshold),
            });
        }

        let defaults = ModerationConfig::default();
        let moderation = ModerationConfig {
            threshold,
            margin_band,
            max_retry_queue_count: at_least_one(&get, "MODERATION_MAX_RETRY_QUEUE", 5)?,
            requeue_base_delay: millis(&get, "MODERATION_REQUEUE_DELAY_MS", 2_000, DELAY_MS)?,
            result_cache_ttl: Duration::from_secs(within(
                &get,
                "MODERATION_CACHE_TTL_SECS",
                60,
                0..=*INTERVAL_SECS.end(),
            )?),
            sink_max_attempts: at_least_one(&get, "SINK_MAX_ATTEMPTS", 3)?,
            ..defaults
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "data/content.db".to_string()),
            provider,
            classifier,
            rate_limit,
            moderation,
            auto_reply_enabled: parse(&get, "AUTO_REPLY_ENABLED", true)?,
            pending_sweep_interval: Duration::from_secs(within(
                &get,
                "PENDING_SWEEP_INTERVAL_SECS",
                300,
                INTERVAL_SECS,
            )?),
        })
    }
}

fn parse<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn at_least_one<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + From<u8> + std::fmt::Display,
{
    let value = parse(get, key, default)?;
    if value < T::from(1) {
        return Err(ConfigError::OutOfRange {
            key,
            reason: format!("{} must be at least 1", value),
        });
    }
    Ok(value)
}

fn within<G>(
    get: &G,
    key: &'static str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse(get, key, default)?;
    if !range.contains(&value) {
        return Err(ConfigError::OutOfRange {
            key,
            reason: format!("{} is not in [{}, {}]", value, range.start(), range.end()),
        });
    }
    Ok(value)
}

fn millis<G>(
    get: &G,
    key: &'static str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    within(get, key, default, range).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("GEMINI_API_KEY", "k")]).unwrap();

        assert_eq!(config.database_url, "data/content.db");
        assert_eq!(
            config.provider,
            ClassifierProvider::Gemini {
                api_key: "k".into(),
                model: "gemini-1.5-flash".into()
            }
        );
        assert_eq!(config.classifier.timeout, Duration::from_secs(5));
        assert_eq!(config.classifier.max_attempts, 3);
        assert_eq!(config.rate_limit.capacity, 60);
        assert_eq!(config.rate_limit.max_concurrent, 4);
        assert_eq!(config.moderation.threshold, 0.5);
        assert_eq!(config.moderation.margin_band, 0.1);
        assert_eq!(config.moderation.max_retry_queue_count, 5);
        assert!(config.auto_reply_enabled);
        assert_eq!(config.pending_sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_http_provider() {
        let config = load(&[
            ("CLASSIFIER_PROVIDER", "HTTP"),
            ("CLASSIFIER_ENDPOINT", "https://mod.internal/classify"),
            ("MODERATION_THRESHOLD", "0.7"),
            ("MODERATION_MARGIN_BAND", "0.2"),
            ("AUTO_REPLY_ENABLED", "false"),
        ])
        .unwrap();

        assert_eq!(
            config.provider,
            ClassifierProvider::Http {
                endpoint: "https://mod.internal/classify".into(),
                api_key: None
            }
        );
        assert_eq!(config.moderation.threshold, 0.7);
        assert!(!config.auto_reply_enabled);
    }

    #[test]
    fn test_missing_credentials() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("GEMINI_API_KEY"));
        assert_eq!(
            load(&[("CLASSIFIER_PROVIDER", "http")]).unwrap_err(),
            ConfigError::Missing("CLASSIFIER_ENDPOINT")
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let key = ("GEMINI_API_KEY", "k");

        assert!(matches!(
            load(&[key, ("MODERATION_THRESHOLD", "0")]),
            Err(ConfigError::OutOfRange { key: "MODERATION_THRESHOLD", .. })
        ));
        assert!(matches!(
            load(&[key, ("MODERATION_THRESHOLD", "0.3"), ("MODERATION_MARGIN_BAND", "0.4")]),
            Err(ConfigError::OutOfRange { key: "MODERATION_MARGIN_BAND", .. })
        ));
        assert!(matches!(
            load(&[key, ("MODERATION_MAX_RETRY_QUEUE", "0")]),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            load(&[key, ("CLASSIFIER_TIMEOUT_MS", "soon")]),
            Err(ConfigError::Invalid { key: "CLASSIFIER_TIMEOUT_MS", .. })
        ));
        assert!(matches!(
            load(&[("CLASSIFIER_PROVIDER", "openai")]),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_classifier_timeout_is_bounded() {
        let key = ("GEMINI_API_KEY", "k");

        for value in ["0", "999999999999", "18446744073709551615"] {
            assert_eq!(
                load(&[key, ("CLASSIFIER_TIMEOUT_MS", value)]).unwrap_err(),
                ConfigError::OutOfRange {
                    key: "CLASSIFIER_TIMEOUT_MS",
                    reason: format!("{} is not in [1, 300000]", value),
                }
            );
        }
        let config = load(&[key, ("CLASSIFIER_TIMEOUT_MS", "300000")]).unwrap();
        assert_eq!(config.classifier.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_delays_and_intervals_are_bounded() {
        let key = ("GEMINI_API_KEY", "k");

        assert!(matches!(
            load(&[key, ("CLASSIFIER_MAX_BACKOFF_MS", "999999999999")]),
            Err(ConfigError::OutOfRange { key: "CLASSIFIER_MAX_BACKOFF_MS", .. })
        ));
        assert!(matches!(
            load(&[key, ("PENDING_SWEEP_INTERVAL_SECS", "0")]),
            Err(ConfigError::OutOfRange { key: "PENDING_SWEEP_INTERVAL_SECS", .. })
        ));
        assert!(matches!(
            load(&[key, ("MODERATION_CACHE_TTL_SECS", "999999999999")]),
            Err(ConfigError::OutOfRange { key: "MODERATION_CACHE_TTL_SECS", .. })
        ));
        assert!(load(&[key, ("CLASSIFIER_BACKOFF_MS", "0")]).is_ok());
    }
}
