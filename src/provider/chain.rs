//! Ordered provider fallback.

use std::sync::Arc;

use reqwest::Client;

use crate::backoff::Backoff;
use crate::config::ProvidersConfig;
use crate::state::Mode;

use super::{GeminiProvider, Modality, ModelProvider, ModelRequest, OllamaProvider, ProviderError};

/// A successful response and the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub provider: String,
    pub text: String,
}

/// One local backend plus an ordered list of cloud candidates.
///
/// The chain itself holds no per-task state, so one instance can serve
/// concurrent tasks.
#[derive(Clone)]
pub struct ProviderChain {
    local: Option<Arc<dyn ModelProvider>>,
    cloud: Vec<Arc<dyn ModelProvider>>,
    backoff: Backoff,
}

impl ProviderChain {
    /// Creates a chain over the given cloud candidates, in priority order.
    pub fn new(cloud: Vec<Arc<dyn ModelProvider>>) -> Self {
        Self {
            local: None,
            cloud,
            backoff: Backoff::fixed(std::time::Duration::from_secs(1)),
        }
    }

    /// Sets the local backend used in [`Mode::Local`].
    pub fn with_local(mut self, local: Arc<dyn ModelProvider>) -> Self {
        self.local = Some(local);
        self
    }

    /// Sets the wait applied after each failed cloud candidate.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Builds the HTTP-backed chain described by the configuration.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        let api_key = config.cloud.api_key();
        let cloud = config
            .cloud
            .models
            .iter()
            .map(|model| {
                let modality = if model.multimodal {
                    Modality::Multimodal
                } else {
                    Modality::TextOnly
                };
                Arc::new(GeminiProvider::new(
                    client.clone(),
                    config.cloud.endpoint.clone(),
                    model.name.clone(),
                    api_key.clone(),
                    modality,
                )) as Arc<dyn ModelProvider>
            })
            .collect();

        let local = OllamaProvider::new(
            client,
            config.local.endpoint.clone(),
            config.local.model.clone(),
        );

        Ok(Self::new(cloud)
            .with_local(Arc::new(local))
            .with_backoff(Backoff::new(
                config.backoff_interval(),
                config.backoff_max(),
            )))
    }

    /// Names of the cloud candidates in priority order.
    pub fn cloud_names(&self) -> Vec<&str> {
        self.cloud.iter().map(|p| p.name()).collect()
    }

    /// Produces a single model response, trying backends in priority order.
    ///
    /// In local mode a failure of the local backend degrades to the cloud
    /// chain for this call only. The first success short-circuits the rest.
    pub async fn complete(
        &self,
        request: &ModelRequest,
        mode: Mode,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut attempted = Vec::new();

        if mode == Mode::Local {
            match &self.local {
                Some(local) => {
                    tracing::info!(provider = %local.name(), "invoking local provider");
                    match local.invoke(&request.for_provider(local.descriptor())).await {
                        Ok(text) => {
                            return Ok(ProviderResponse {
                                provider: local.name().to_string(),
                                text,
                            })
                        }
                        Err(e) => {
                            tracing::warn!(
                                provider = %local.name(),
                                error = %e,
                                "local provider failed, falling back to cloud"
                            );
                            attempted.push((local.name().to_string(), e.to_string()));
                        }
                    }
                }
                None => {
                    tracing::warn!("local mode requested but no local provider configured");
                }
            }
        }

        let mut backoff = self.backoff.clone();
        backoff.reset();

        for candidate in &self.cloud {
            tracing::info!(provider = %candidate.name(), "invoking cloud provider");
            match candidate
                .invoke(&request.for_provider(candidate.descriptor()))
                .await
            {
                Ok(text) => {
                    return Ok(ProviderResponse {
                        provider: candidate.name().to_string(),
                        text,
                    })
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %candidate.name(),
                        error = %e,
                        backoff_ms = backoff.current().as_millis() as u64,
                        "cloud provider failed, trying next candidate"
                    );
                    attempted.push((candidate.name().to_string(), e.to_string()));
                    backoff.wait().await;
                }
            }
        }

        Err(ProviderError::ChainExhausted { attempted })
    }
}
