//! Backend abstraction
//!
//! - [`traits`]: the generic [`Backend`] trait, closure backends and chat payloads
//! - [`http`]: OpenAI-compatible HTTP adapter

pub mod http;
pub mod traits;

pub use http::{classify_status, HttpBackend};
pub use traits::{
    backend_fn, Backend, BackendEntry, ChatMessage, ChatRequest, ChatResponse, FnBackend,
};
