use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::gemini;
use snafu::{ResultExt, ensure};

use super::backend::{
    BackendResult, BoxFuture, CompletionsFailedSnafu, EmptyPromptSnafu, FragmentStream,
    GenerateRequest, GenerationBackend, HttpClientSnafu, MissingApiKeySnafu, into_fragment_stream,
};
use super::prompt::compose_request_prompt;

pub const GEMINI_BACKEND_ID: &str = "gemini";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
            model: model.into().trim().to_string(),
        }
    }
}

/// Cloud-model variant backed by the Gemini API.
pub struct GeminiBackend {
    config: GeminiConfig,
}

impl GeminiBackend {
    pub fn new(mut config: GeminiConfig) -> BackendResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "gemini-backend-new",
                backend_id: GEMINI_BACKEND_ID,
            }
        );

        if config.model.is_empty() {
            config.model = DEFAULT_GEMINI_MODEL.to_string();
        }

        Ok(Self { config })
    }

    fn build_client(&self) -> BackendResult<gemini::Client> {
        gemini::Client::builder()
            .api_key(self.config.api_key.as_str())
            .build()
            .context(HttpClientSnafu {
                stage: "build-client",
            })
    }

    async fn open(&self, request: GenerateRequest) -> BackendResult<FragmentStream> {
        ensure!(
            !request.prompt.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "gemini-open-stream",
            }
        );

        let client = self.build_client()?;
        let model = client.completion_model(self.config.model.as_str());
        let full_prompt = compose_request_prompt(&request.prompt, &request.context);

        tracing::debug!(model_id = %self.config.model, "opening gemini completion stream");

        let stream = model
            .completion_request(RigMessage::user(full_prompt))
            .stream()
            .await
            .context(CompletionsFailedSnafu {
                stage: "open-stream",
            })?;

        Ok(into_fragment_stream(stream))
    }
}

impl GenerationBackend for GeminiBackend {
    fn id(&self) -> &'static str {
        GEMINI_BACKEND_ID
    }

    fn label(&self) -> &'static str {
        "Gemini"
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn open_stream(&self, request: GenerateRequest) -> BoxFuture<'_, BackendResult<FragmentStream>> {
        Box::pin(self.open(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;

    #[test]
    fn missing_api_key_is_rejected_before_any_network_work() {
        let result = GeminiBackend::new(GeminiConfig::new("   ", "gemini-2.0-flash"));
        assert!(matches!(result, Err(BackendError::MissingApiKey { .. })));
    }

    #[test]
    fn empty_model_falls_back_to_the_default() {
        let backend = GeminiBackend::new(GeminiConfig::new("test-key", "")).expect("backend");
        assert_eq!(backend.model_id(), DEFAULT_GEMINI_MODEL);
    }
}
