//! Turns a task plus prior failure into generated code.

use crate::prompt;
use crate::provider::{ModelRequest, ProviderChain};
use crate::state::{Status, TaskState};

/// What a generation cycle produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// A backend answered; `state.code` holds the extracted candidate (possibly empty).
    Generated { provider: String },
    /// Every backend failed; the failure was already recorded in the log.
    Failed,
}

/// Builds code-generation requests and extracts the runnable candidate.
#[derive(Clone)]
pub struct Generator {
    chain: ProviderChain,
    language: String,
}

impl Generator {
    /// Creates a generator producing code in `language` (also the fence tag).
    pub fn new(chain: ProviderChain, language: impl Into<String>) -> Self {
        Self {
            chain,
            language: language.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Builds the request for the current state.
    pub fn build_request(&self, state: &TaskState) -> ModelRequest {
        let request = state.request();
        let user = prompt::user_prompt(
            &request.task,
            request.context.as_deref(),
            state.last_failure(),
        );
        ModelRequest::new(prompt::system_instruction(&self.language), user)
            .with_images(request.images.clone())
    }

    /// Runs one generation cycle, counting it as an attempt whatever happens.
    pub async fn generate(&self, state: &mut TaskState) -> GenerationOutcome {
        state.attempts += 1;
        let request = self.build_request(state);
        let mode = state.request().mode;

        tracing::info!(attempt = state.attempts, mode = %mode, "generating code");

        match self.chain.complete(&request, mode).await {
            Ok(response) => {
                state.code = extract_code(&response.text, &self.language);
                tracing::debug!(
                    provider = %response.provider,
                    code_len = state.code.len(),
                    "extracted candidate code"
                );
                GenerationOutcome::Generated {
                    provider: response.provider,
                }
            }
            Err(e) => {
                tracing::warn!(attempt = state.attempts, error = %e, "generation failed");
                state.code.clear();
                state.record(Status::Error, format!("AI Error: {}", e));
                GenerationOutcome::Failed
            }
        }
    }
}

/// Extracts the first block fenced as ```` ```<language> ````, falling back to
/// the whole trimmed response.
pub fn extract_code(response: &str, language: &str) -> String {
    let opening = format!("```{}", language);
    if let Some(start) = response.find(&opening) {
        let body = &response[start + opening.len()..];
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
    }
    response.trim().to_string()
}
