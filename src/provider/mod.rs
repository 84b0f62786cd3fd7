//! Model backends and the ordered fallback chain over them.
//!
//! Every backend implements [`ModelProvider`]; the [`ProviderChain`] holds
//! them in priority order and tries each until one returns a response.

mod chain;
mod gemini;
mod ollama;

pub use chain::{ProviderChain, ProviderResponse};
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;

use std::borrow::Cow;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::ImageAttachment;

/// Input modalities a backend accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    TextOnly,
    Multimodal,
}

/// Static description of a backend. Position in the chain is its priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Human-readable name, usually the model identifier.
    pub name: String,
    /// Base endpoint the backend talks to.
    pub endpoint: String,
    pub modality: Modality,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, modality: Modality) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            modality,
        }
    }

    pub fn supports_images(&self) -> bool {
        self.modality == Modality::Multimodal
    }
}

/// A single code-generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    /// System instruction.
    pub system: String,
    /// User prompt.
    pub user: String,
    /// Images to attach as inline content parts.
    pub images: Vec<ImageAttachment>,
}

impl ModelRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }

    /// The request as the given backend should see it: images are kept only
    /// for multimodal candidates.
    pub fn for_provider(&self, descriptor: &ProviderDescriptor) -> Cow<'_, ModelRequest> {
        if self.images.is_empty() || descriptor.supports_images() {
            Cow::Borrowed(self)
        } else {
            Cow::Owned(ModelRequest {
                system: self.system.clone(),
                user: self.user.clone(),
                images: Vec::new(),
            })
        }
    }
}

/// Failure of a provider invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport-level failure (connection refused, timeout, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The backend answered but produced no text.
    #[error("empty response from {0}")]
    EmptyResponse(String),

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The backend is misconfigured (e.g. missing credential).
    #[error("provider misconfigured: {0}")]
    Config(String),

    /// Every candidate in the chain failed.
    #[error("all providers failed: {}", format_attempts(.attempted))]
    ChainExhausted { attempted: Vec<(String, String)> },
}

fn format_attempts(attempted: &[(String, String)]) -> String {
    if attempted.is_empty() {
        return "no providers configured".to_string();
    }
    attempted
        .iter()
        .map(|(name, reason)| format!("{}: {}", name, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// A model backend with a single "invoke" capability.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Returns the descriptor of this backend.
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Sends the request and returns the raw response text.
    async fn invoke(&self, request: &ModelRequest) -> Result<String, ProviderError>;

    /// Returns the name of this backend.
    fn name(&self) -> &str {
        &self.descriptor().name
    }
}
