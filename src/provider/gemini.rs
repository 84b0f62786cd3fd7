//! Cloud model backend speaking the Gemini `generateContent` REST API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Modality, ModelProvider, ModelRequest, ProviderDescriptor, ProviderError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// One Gemini model in the cloud fallback chain.
pub struct GeminiProvider {
    client: Client,
    descriptor: ProviderDescriptor,
    api_key: Option<String>,
}

impl GeminiProvider {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        modality: Modality,
    ) -> Self {
        Self {
            client,
            descriptor: ProviderDescriptor::new(model, endpoint, modality),
            api_key,
        }
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.descriptor.endpoint.trim_end_matches('/'),
            self.descriptor.name
        )
    }

    fn build_body<'a>(&self, request: &'a ModelRequest) -> GenerateRequest<'a> {
        let mut parts = vec![Part::Text {
            text: &request.user,
        }];
        for image in &request.images {
            parts.push(Part::Inline {
                inline_data: InlineData {
                    mime_type: &image.mime_type,
                    data: &image.data,
                },
            });
        }

        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: &request.system,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts,
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        }
    }

    fn parse_response(&self, body: &str) -> Result<String, ProviderError> {
        let parsed: GenerateResponse =
            serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse(self.descriptor.name.clone()));
        }
        Ok(text)
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Config("no cloud API key configured".to_string()))?;

        tracing::debug!(
            model = %self.descriptor.name,
            images = request.images.len(),
            "invoking cloud model"
        );

        let response = self
            .client
            .post(self.generate_url())
            .header("x-goog-api-key", api_key)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ImageAttachment;

    fn provider(api_key: Option<&str>) -> GeminiProvider {
        GeminiProvider::new(
            Client::new(),
            "https://generativelanguage.googleapis.com/",
            "gemini-1.5-flash",
            api_key.map(str::to_string),
            Modality::Multimodal,
        )
    }

    #[test]
    fn generate_url_names_the_model() {
        assert_eq!(
            provider(None).generate_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn body_appends_images_after_text() {
        let request = ModelRequest::new("sys", "draw").with_images(vec![
            ImageAttachment::new("image/png", "AAAA"),
            ImageAttachment::new("image/jpeg", "BBBB"),
        ]);
        let body = serde_json::to_value(provider(None).build_body(&request)).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(body["systemInstruction"].get("role").is_none());
        let parts = &body["contents"][0]["parts"];
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(parts[0]["text"], "draw");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "AAAA");
        assert_eq!(parts[2]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(body["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn parse_joins_candidate_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"```python\n"},{"text":"print(2)\n```"}]}}]}"#;
        assert_eq!(
            provider(None).parse_response(body).unwrap(),
            "```python\nprint(2)\n```"
        );
    }

    #[test]
    fn parse_without_candidates_is_empty_response() {
        let err = provider(None).parse_response(r#"{"candidates":[]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let err = provider(None)
            .invoke(&ModelRequest::new("s", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}
