// Generic HTTP classifier - for self-hosted moderation models.
//
// POSTs `{"text": "..."}` to a configured endpoint and expects at least
// `{"label": "...", "score": 0.0..1.0}` back. Extra fields are ignored.

use crate::core::moderation::{ClassifierError, RawClassification, TextClassifier};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    label: Option<String>,
    score: Option<f64>,
}

pub struct HttpClassifier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpClassifier {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
        }
    }
}

fn parse_response(body: &str) -> Result<RawClassification, ClassifierError> {
    let parsed: ClassifyResponse = serde_json::from_str(body)
        .map_err(|e| ClassifierError::Malformed(format!("classifier response: {}", e)))?;

    match (parsed.label, parsed.score) {
        (Some(label), Some(score)) => Ok(RawClassification { label, score }),
        (None, _) => Err(ClassifierError::Malformed("missing label".into())),
        (_, None) => Err(ClassifierError::Malformed("missing score".into())),
    }
}

#[async_trait]
impl TextClassifier for HttpClassifier {
    async fn classify_text(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<RawClassification, ClassifierError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&ClassifyRequest { text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClassifierError::Timeout
            } else {
                ClassifierError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClassifierError::RateLimited(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(ClassifierError::Transport(format!(
                "classifier returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        parse_response(&body)
    }
}
