//! Backend Traits
//!
//! The dispatch core is generic over the payload `P` a backend accepts and
//! the response `R` it produces. Adapters implement [`Backend`] and report
//! failures as a classified [`BackendError`]; the router never inspects error
//! text.
//!
//! [`ChatRequest`]/[`ChatResponse`] are the payload types used by the bundled
//! HTTP adapter. Anything else works as long as it is `Send + Sync`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// A named model backend
#[async_trait]
pub trait Backend<P, R>: Send + Sync
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Backend name, unique within a router
    fn name(&self) -> &str;

    /// Execute one call
    async fn invoke(&self, payload: &P) -> Result<R, BackendError>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

// ============================================================================
// Closure Backends
// ============================================================================

/// Backend built from an async closure
///
/// The closure receives an owned clone of the payload.
pub struct FnBackend<F> {
    name: String,
    call: F,
}

impl<F> FnBackend<F> {
    /// Wrap `call` as a backend named `name`
    pub fn new(name: impl Into<String>, call: F) -> Self {
        Self {
            name: name.into(),
            call,
        }
    }
}

impl<F> std::fmt::Debug for FnBackend<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnBackend").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<P, R, F, Fut> Backend<P, R> for FnBackend<F>
where
    P: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, BackendError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, payload: &P) -> Result<R, BackendError> {
        (self.call)(payload.clone()).await
    }
}

/// Shorthand for [`FnBackend::new`] returning a shareable backend
pub fn backend_fn<P, R, F, Fut>(name: impl Into<String>, call: F) -> Arc<dyn Backend<P, R>>
where
    P: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BackendError>> + Send + 'static,
{
    Arc::new(FnBackend::new(name, call))
}

// ============================================================================
// Pool Entries
// ============================================================================

/// A backend together with the capability tags it declares
pub struct BackendEntry<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    /// The backend
    pub backend: Arc<dyn Backend<P, R>>,
    /// Task kinds this backend is good at (e.g. "vision", "coding")
    pub capabilities: Vec<String>,
}

impl<P, R> BackendEntry<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Entry with no capability tags
    pub fn new(backend: Arc<dyn Backend<P, R>>) -> Self {
        Self {
            backend,
            capabilities: Vec::new(),
        }
    }

    /// Declare capability tags
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Backend name
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Whether this entry declares `task_kind`
    pub fn supports(&self, task_kind: &str) -> bool {
        self.capabilities.iter().any(|c| c == task_kind)
    }
}

impl<P, R> Clone for BackendEntry<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            capabilities: self.capabilities.clone(),
        }
    }
}

// ============================================================================
// Chat Payloads
// ============================================================================

/// One message in a chat exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user" or "assistant"
    pub role: String,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Chat completion request. Model selection belongs to the backend, not the payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation so far
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens in the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Single user prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            temperature: None,
            max_tokens: None,
        }
    }

    /// Prepend a system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.messages.insert(0, ChatMessage::system(system));
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Chat completion response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The response text
    pub content: String,
    /// Model that generated the response
    pub model: String,
    /// Tokens used (if reported)
    pub tokens_used: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_backend_invokes_closure() {
        let backend = backend_fn("echo", |prompt: String| async move {
            Ok::<_, BackendError>(prompt.to_uppercase())
        });

        assert_eq!(backend.name(), "echo");
        assert!(backend.health_check().await);
        assert_eq!(backend.invoke(&"hi".to_string()).await.unwrap(), "HI");
    }

    #[test]
    fn test_entry_capabilities() {
        let entry = BackendEntry::new(backend_fn("vision-model", |_: u8| async {
            Ok::<u8, BackendError>(0)
        }))
        .with_capabilities(["vision", "ocr"]);

        assert!(entry.supports("vision"));
        assert!(!entry.supports("coding"));
        assert_eq!(entry.name(), "vision-model");
    }

    #[test]
    fn test_chat_request_builder() {
        let request = ChatRequest::new("explain this")
            .with_system("be brief")
            .with_temperature(5.0)
            .with_max_tokens(64);

        assert_eq!(request.messages[0], ChatMessage::system("be brief"));
        assert_eq!(request.messages[1].role, "user");
        assert_eq!(request.temperature, Some(2.0));
        assert_eq!(request.max_tokens, Some(64));
    }
}
