use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::ollama;
use snafu::{ResultExt, ensure};

use super::backend::{
    BackendResult, BoxFuture, CompletionsFailedSnafu, EmptyPromptSnafu, FragmentStream,
    GenerateRequest, GenerationBackend, HttpClientSnafu, into_fragment_stream,
};
use super::prompt::compose_request_prompt;

pub const OLLAMA_BACKEND_ID: &str = "ollama";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

impl OllamaConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            model: model.into().trim().to_string(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_BASE_URL, DEFAULT_OLLAMA_MODEL)
    }
}

/// Local-model variant backed by an Ollama server.
pub struct OllamaBackend {
    config: OllamaConfig,
}

impl OllamaBackend {
    pub fn new(mut config: OllamaConfig) -> BackendResult<Self> {
        if config.base_url.is_empty() {
            config.base_url = DEFAULT_OLLAMA_BASE_URL.to_string();
        }
        if config.model.is_empty() {
            config.model = DEFAULT_OLLAMA_MODEL.to_string();
        }

        Ok(Self { config })
    }

    fn build_client(&self) -> BackendResult<ollama::Client> {
        ollama::Client::builder()
            .api_key(rig::client::Nothing)
            .base_url(self.config.base_url.as_str())
            .build()
            .context(HttpClientSnafu {
                stage: "build-client",
            })
    }

    async fn open(&self, request: GenerateRequest) -> BackendResult<FragmentStream> {
        ensure!(
            !request.prompt.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "ollama-open-stream",
            }
        );

        let client = self.build_client()?;
        let model = client.completion_model(self.config.model.as_str());
        let full_prompt = compose_request_prompt(&request.prompt, &request.context);

        tracing::debug!(
            model_id = %self.config.model,
            base_url = %self.config.base_url,
            "opening ollama completion stream"
        );

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

impl GenerationBackend for OllamaBackend {
    fn id(&self) -> &'static str {
        OLLAMA_BACKEND_ID
    }

    fn label(&self) -> &'static str {
        "Ollama"
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

    #[test]
    fn empty_fields_fall_back_to_local_defaults() {
        let backend = OllamaBackend::new(OllamaConfig::new("", "")).expect("backend");
        assert_eq!(backend.model_id(), DEFAULT_OLLAMA_MODEL);
        assert_eq!(backend.config.base_url, DEFAULT_OLLAMA_BASE_URL);
    }
}
