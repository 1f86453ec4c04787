//! OpenAI-compatible HTTP Backend
//!
//! Talks to any server exposing `POST {base_url}/chat/completions` in the
//! OpenAI wire format (OpenRouter, vLLM, llama.cpp server, Ollama's `/v1`).
//!
//! # Failure classification
//!
//! | Response                          | Kind             |
//! |-----------------------------------|------------------|
//! | 400, 401, 403, 422                | `NonRecoverable` |
//! | 404                               | `Unsupported`    |
//! | 408, 409, 425, 429, 5xx           | `Transient`      |
//! | connect / timeout / body errors   | `Transient`      |

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::traits::{Backend, ChatRequest, ChatResponse};
use crate::config::BackendSpec;
use crate::error::{BackendError, FailureKind};

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP chat-completions backend
#[derive(Clone, Debug)]
pub struct HttpBackend {
    /// Backend name used for routing and statistics
    name: String,
    /// Model identifier sent in the request body
    model: String,
    /// Base URL, e.g. `https://openrouter.ai/api/v1`
    base_url: String,
    /// Bearer token
    api_key: Option<String>,
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend with the default timeout
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, BackendError> {
        Self::with_timeout(name, model, base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a backend with a custom request timeout
    pub fn with_timeout(
        name: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::non_recoverable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            http_client,
        })
    }

    /// Build from a `[[backends]]` entry, reading the key from its env var
    pub fn from_spec(spec: &BackendSpec) -> Result<Self, BackendError> {
        let timeout = spec
            .timeout_secs
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs);
        let mut backend = Self::with_timeout(&spec.name, &spec.model, &spec.base_url, timeout)?;

        if let Some(var) = &spec.api_key_env {
            match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => backend = backend.with_api_key(key.trim()),
                _ => tracing::warn!(backend = %spec.name, env = %var, "API key variable not set"),
            }
        }
        Ok(backend)
    }

    /// Authenticate with a bearer token
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Model identifier sent upstream
    pub fn model(&self) -> &str {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "stream": false,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }
}

/// Map an HTTP status to a failure kind
#[must_use]
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        400 | 401 | 403 | 422 => FailureKind::NonRecoverable,
        404 => FailureKind::Unsupported,
        408 | 409 | 425 | 429 | 500..=599 => FailureKind::Transient,
        _ => FailureKind::Unsupported,
    }
}

fn classify_transport(error: &reqwest::Error) -> BackendError {
    let kind = if error.is_builder() {
        FailureKind::NonRecoverable
    } else {
        FailureKind::Transient
    };
    BackendError::new(kind, error.to_string())
}

#[derive(Deserialize)]
struct CompletionBody {
    model: Option<String>,
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionUsage {
    total_tokens: Option<u32>,
}

fn parse_completion(body: CompletionBody, requested_model: &str) -> Result<ChatResponse, BackendError> {
    let content = body
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.is_empty())
        .ok_or_else(|| BackendError::transient("response contained no completion text"))?;

    Ok(ChatResponse {
        content,
        model: body.model.unwrap_or_else(|| requested_model.to_string()),
        tokens_used: body.usage.and_then(|u| u.total_tokens),
    })
}

#[async_trait]
impl Backend<ChatRequest, ChatResponse> for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let mut builder = self
            .http_client
            .post(self.completions_url())
            .json(&self.request_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| classify_transport(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(backend = %self.name, %status, "Backend returned error status");
            return Err(BackendError::new(
                classify_status(status.as_u16()),
                format!("{} returned {status}: {body}", self.name),
            )
            .with_status(status.as_u16()));
        }

        let body: CompletionBody = response.json().await.map_err(|e| classify_transport(&e))?;
        parse_completion(body, &self.model)
    }

    async fn health_check(&self) -> bool {
        let mut builder = self.http_client.get(self.models_url());
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        match builder.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
