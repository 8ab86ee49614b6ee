//! OpenRouter chat completions transport.
//!
//! One HTTP round trip per call. Retries live in `services::ai_client`.

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Message in the OpenAI chat format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Failure of a single completion attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("AI service responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response from AI service: {0}")]
    Malformed(String),
}

/// Whether a failed attempt is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
        }
    }
}

impl TransportError {
    /// Timeouts, connection errors, 5xx and 429 are transient; everything else is permanent.
    pub fn class(&self) -> FailureClass {
        match self {
            TransportError::Timeout(_) | TransportError::Connect(_) => FailureClass::Transient,
            TransportError::Status { status, .. } if *status == 429 || *status >= 500 => {
                FailureClass::Transient
            }
            TransportError::Status { .. } | TransportError::Malformed(_) => FailureClass::Permanent,
        }
    }
}

/// Sends one chat completion and returns the first choice's content.
pub trait ChatTransport: Send + Sync {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> BoxFuture<'a, Result<String, TransportError>>;
}

/// HTTP transport to the OpenRouter API.
pub struct OpenRouterClient {
    client: Client,
    url: String,
    api_key: String,
}

impl OpenRouterClient {
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn post_once(&self, request: &ChatRequest) -> Result<String, TransportError> {
        debug!("POST {} (model {})", self.url, request.model);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let body = response.text().await.map_err(classify_reqwest)?;
        first_choice(&body)
    }
}

fn classify_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() || e.is_body() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Malformed(e.to_string())
    }
}

/// Content of the first choice of a chat completions body.
pub fn first_choice(body: &str) -> Result<String, TransportError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| TransportError::Malformed(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| TransportError::Malformed("response has no choices".to_string()))
}

impl ChatTransport for OpenRouterClient {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> BoxFuture<'a, Result<String, TransportError>> {
        self.post_once(request).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        let status = |s: u16| TransportError::Status {
            status: s,
            body: String::new(),
        };
        assert_eq!(status(429).class(), FailureClass::Transient);
        assert_eq!(status(503).class(), FailureClass::Transient);
        assert_eq!(status(400).class(), FailureClass::Permanent);
        assert_eq!(status(401).class(), FailureClass::Permanent);
        assert_eq!(
            TransportError::Timeout("30s".into()).class(),
            FailureClass::Transient
        );
        assert_eq!(
            TransportError::Malformed("bad".into()).class(),
            FailureClass::Permanent
        );
    }

    #[test]
    fn test_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        assert_eq!(first_choice(body).unwrap(), "hello");

        assert!(matches!(
            first_choice(r#"{"choices":[]}"#),
            Err(TransportError::Malformed(_))
        ));
        assert!(matches!(first_choice("not json"), Err(TransportError::Malformed(_))));
    }
}
