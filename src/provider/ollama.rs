//! Local model backend speaking the Ollama chat API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Modality, ModelProvider, ModelRequest, ProviderDescriptor, ProviderError};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    options: Options,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Options {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Local Ollama provider. Text-only.
pub struct OllamaProvider {
    client: Client,
    descriptor: ProviderDescriptor,
    model: String,
}

impl OllamaProvider {
    pub fn new(client: Client, endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            client,
            descriptor: ProviderDescriptor::new(model.clone(), endpoint, Modality::TextOnly),
            model,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.descriptor.endpoint.trim_end_matches('/'))
    }

    fn build_body<'a>(&'a self, request: &'a ModelRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            stream: false,
            options: Options { temperature: 0.0 },
        }
    }

    fn parse_response(&self, body: &str) -> Result<String, ProviderError> {
        let parsed: ChatResponse =
            serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let content = parsed.message.map(|m| m.content).unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ProviderError::EmptyResponse(self.descriptor.name.clone()));
        }
        Ok(content)
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<String, ProviderError> {
        tracing::debug!(model = %self.model, url = %self.chat_url(), "invoking local model");

        let response = self
            .client
            .post(self.chat_url())
            .json(&self.build_body(request))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        self.parse_response(&text)
    }
}
