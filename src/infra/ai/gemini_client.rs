// =============================================================================
// GEMINI CLIENT - Google AI Studio API Integration
// =============================================================================
//
// Implements two core ports on top of Gemini's generateContent endpoint:
// - `TextClassifier`: the text is sent with every safety filter set to
//   BLOCK_NONE and the returned safety ratings are folded into a single
//   (label, score) pair.
// - `ReplyGenerator`: plain text generation for auto-replies.
//
// **Environment Variables:**
// - `GEMINI_API_KEY` - Your API key from https://aistudio.google.com/apikey
// - `GEMINI_MODEL` - Model name, defaults to `gemini-1.5-flash`

use crate::core::moderation::{ClassifierError, RawClassification, TextClassifier, CLEAN_LABEL};
use crate::core::replies::{ReplyError, ReplyGenerator};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Categories we ask Gemini to rate.
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Upper bound for reply generation, which has no caller-supplied timeout.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// GEMINI API DATA STRUCTURES
// =============================================================================
//
// See: https://ai.google.dev/api/generate-content

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(default)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(default)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<SafetySetting>,
}

/// Harm probability. The REST API sends the enum name; some proxies send
/// the numeric value instead.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
enum HarmProbability {
    Name(String),
    Number(i64),
}

impl HarmProbability {
    /// Map the coarse probability bucket onto a score in [0, 1].
    fn score(&self) -> Option<f64> {
        let level = match self {
            HarmProbability::Name(name) => match name.as_str() {
                "NEGLIGIBLE" => 1,
                "LOW" => 2,
                "MEDIUM" => 3,
                "HIGH" => 4,
                _ => return None,
            },
            HarmProbability::Number(n) => *n,
        };
        match level {
            1 => Some(0.05),
            2 => Some(0.55),
            3 => Some(0.8),
            4 => Some(0.97),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SafetyRating {
    category: String,
    probability: HarmProbability,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Candidate {
    content: Option<Content>,
    safety_ratings: Vec<SafetyRating>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PromptFeedback {
    block_reason: Option<String>,
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

// =============================================================================
// GEMINI CLIENT IMPLEMENTATION
// =============================================================================

pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }

    fn user_content(text: String) -> Content {
        Content {
            role: "user".to_string(),
            parts: vec![Part { text: Some(text) }],
        }
    }

    async fn generate(
        &self,
        request: &GenerateContentRequest,
        timeout: Duration,
    ) -> Result<GenerateContentResponse, ClassifierError> {
        // Never log this URL, it carries the API key.
        let url = format!(
            "{}/{}:generateContent?key={}",
            API_BASE, self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ClassifierError::Malformed(format!("Gemini response: {}", e)))
    }
}

fn transport_error(e: reqwest::Error) -> ClassifierError {
    if e.is_timeout() {
        ClassifierError::Timeout
    } else {
        ClassifierError::Transport(e.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> ClassifierError {
    let message = serde_json::from_str::<GeminiErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    if status == StatusCode::TOO_MANY_REQUESTS {
        ClassifierError::RateLimited(message)
    } else {
        ClassifierError::Transport(format!("Gemini API error ({}): {}", status, message))
    }
}

/// Fold the safety ratings into the single highest-risk category.
fn classify_response(response: &GenerateContentResponse) -> Result<RawClassification, ClassifierError> {
    if let Some(feedback) = &response.prompt_feedback {
        if let Some(reason) = &feedback.block_reason {
            // The prompt itself was refused; name the worst category if rated.
            let label = highest_rated(&feedback.safety_ratings)
                .map(|(category, _)| category)
                .unwrap_or_else(|| reason.clone());
            return Ok(RawClassification { label, score: 1.0 });
        }
    }

    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| ClassifierError::Malformed("no candidates and no prompt feedback".into()))?;

    let ratings = if candidate.safety_ratings.is_empty() {
        response
            .prompt_feedback
            .as_ref()
            .map(|f| f.safety_ratings.as_slice())
            .unwrap_or_default()
    } else {
        candidate.safety_ratings.as_slice()
    };

    match highest_rated(ratings) {
        Some((category, score)) if score > 0.5 => Ok(RawClassification {
            label: category,
            score,
        }),
        Some((_, score)) => Ok(RawClassification {
            label: CLEAN_LABEL.to_string(),
            score,
        }),
        None if candidate.finish_reason.as_deref() == Some("SAFETY") => {
            Err(ClassifierError::Malformed("blocked for safety without ratings".into()))
        }
        None => Err(ClassifierError::Malformed("response carried no safety ratings".into())),
    }
}

fn highest_rated(ratings: &[SafetyRating]) -> Option<(String, f64)> {
    ratings
        .iter()
        .filter_map(|r| r.probability.score().map(|s| (r.category.clone(), s)))
        .fold(None, |best, (category, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((category, score)),
        })
}

fn response_text(response: &GenerateContentResponse) -> Option<String> {
    let content = response.candidates.first()?.content.as_ref()?;
    let text: Vec<&str> = content
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect();
    Some(text.join("")).filter(|t| !t.trim().is_empty())
}

fn moderation_prompt(text: &str) -> String {
    format!(
        "Please check the following text for obscene language and insults: \"{}\"",
        text
    )
}

fn reply_prompt(post: &str, comment: &str) -> String {
    format!(
        "Generate a relevant response to this comment: '{}' based on the post: '{}'",
        comment, post
    )
}

#[async_trait]
impl TextClassifier for GeminiClient {
    async fn classify_text(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<RawClassification, ClassifierError> {
        let request = GenerateContentRequest {
            contents: vec![Self::user_content(moderation_prompt(text))],
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
        };

        tracing::debug!("Gemini moderation request to model {}: {} chars", self.model, text.len());
        let response = self.generate(&request, timeout).await?;
        classify_response(&response)
    }
}

#[async_trait]
impl ReplyGenerator for GeminiClient {
    async fn generate_reply(&self, post: &str, comment: &str) -> Result<String, ReplyError> {
        let request = GenerateContentRequest {
            contents: vec![Self::user_content(reply_prompt(post, comment))],
            safety_settings: Vec::new(),
        };

        let response = self
            .generate(&request, REPLY_TIMEOUT)
            .await
            .map_err(|e| ReplyError::Provider(e.to_string()))?;

        let text = response_text(&response).ok_or(ReplyError::Empty)?;
        tracing::debug!("Gemini reply received: {} chars", text.len());
        Ok(text)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> GenerateContentResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_negligible_ratings_are_clean() {
        let response = parse(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"ok"}]},
                "safetyRatings":[
                    {"category":"HARM_CATEGORY_HARASSMENT","probability":"NEGLIGIBLE"},
                    {"category":"HARM_CATEGORY_HATE_SPEECH","probability":"NEGLIGIBLE"}]}]}"#,
        );

        let raw = classify_response(&response).unwrap();
        assert_eq!(raw.label, CLEAN_LABEL);
        assert_eq!(raw.score, 0.05);
    }

    #[test]
    fn test_highest_category_wins() {
        let response = parse(
            r#"{"candidates":[{"safetyRatings":[
                    {"category":"HARM_CATEGORY_HARASSMENT","probability":"MEDIUM"},
                    {"category":"HARM_CATEGORY_HATE_SPEECH","probability":"HIGH"},
                    {"category":"HARM_CATEGORY_DANGEROUS_CONTENT","probability":"LOW"}]}]}"#,
        );

        let raw = classify_response(&response).unwrap();
        assert_eq!(raw.label, "HARM_CATEGORY_HATE_SPEECH");
        assert_eq!(raw.score, 0.97);
    }

    #[test]
    fn test_numeric_probabilities_are_accepted() {
        let response = parse(
            r#"{"candidates":[{"safetyRatings":[
                    {"category":"HARM_CATEGORY_SEXUALLY_EXPLICIT","probability":3}]}]}"#,
        );

        let raw = classify_response(&response).unwrap();
        assert_eq!(raw.label, "HARM_CATEGORY_SEXUALLY_EXPLICIT");
        assert_eq!(raw.score, 0.8);
    }

    #[test]
    fn test_blocked_prompt_scores_maximum() {
        let response = parse(
            r#"{"promptFeedback":{"blockReason":"SAFETY","safetyRatings":[
                    {"category":"HARM_CATEGORY_HARASSMENT","probability":"HIGH"}]}}"#,
        );

        let raw = classify_response(&response).unwrap();
        assert_eq!(raw.label, "HARM_CATEGORY_HARASSMENT");
        assert_eq!(raw.score, 1.0);

        let bare = parse(r#"{"promptFeedback":{"blockReason":"OTHER"}}"#);
        assert_eq!(classify_response(&bare).unwrap().label, "OTHER");
    }

    #[test]
    fn test_empty_response_is_malformed() {
        let err = classify_response(&parse("{}")).unwrap_err();
        assert!(matches!(err, ClassifierError::Malformed(_)));

        let unrated = parse(r#"{"candidates":[{"finishReason":"STOP"}]}"#);
        assert!(matches!(
            classify_response(&unrated),
            Err(ClassifierError::Malformed(_))
        ));
    }

    #[test]
    fn test_status_mapping() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        match status_error(StatusCode::TOO_MANY_REQUESTS, body) {
            ClassifierError::RateLimited(message) => {
                assert_eq!(message, "Resource has been exhausted")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            ClassifierError::Transport(_)
        ));
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateContentRequest {
            contents: vec![GeminiClient::user_content(moderation_prompt("hi"))],
            safety_settings: vec![SafetySetting {
                category: "HARM_CATEGORY_HARASSMENT",
                threshold: "BLOCK_NONE",
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["safetySettings"][0]["threshold"], "BLOCK_NONE");
        assert_eq!(json["contents"][0]["role"], "user");
        assert!(json["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("\"hi\""));
    }

    #[test]
    fn test_reply_text_joins_parts() {
        let response = parse(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello "},{"text":"there"}]}}]}"#,
        );
        assert_eq!(response_text(&response).as_deref(), Some("Hello there"));
        assert_eq!(response_text(&parse(r#"{"candidates":[{}]}"#)), None);
    }
}
