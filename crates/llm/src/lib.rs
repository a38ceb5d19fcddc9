use std::sync::Arc;

mod backend;
mod gemini;
mod ollama;
mod prompt;

pub use backend::{
    BackendError, BackendKind, BackendResult, BoxFuture, FragmentStream, GenerateRequest,
    GenerationBackend,
};
pub use gemini::{DEFAULT_GEMINI_MODEL, GEMINI_BACKEND_ID, GeminiBackend, GeminiConfig};
pub use ollama::{
    DEFAULT_OLLAMA_BASE_URL, DEFAULT_OLLAMA_MODEL, OLLAMA_BACKEND_ID, OllamaBackend, OllamaConfig,
};
pub use prompt::{RESPONSE_STYLE_INSTRUCTIONS, compose_request_prompt};

/// Everything needed to construct either backend variant at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub gemini: GeminiConfig,
    pub ollama: OllamaConfig,
}

pub fn create_backend(
    kind: BackendKind,
    settings: &BackendSettings,
) -> BackendResult<Arc<dyn GenerationBackend>> {
    match kind {
        BackendKind::Ollama => Ok(Arc::new(OllamaBackend::new(settings.ollama.clone())?)),
        BackendKind::Gemini => Ok(Arc::new(GeminiBackend::new(settings.gemini.clone())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BackendSettings {
        BackendSettings {
            gemini: GeminiConfig::new("test-key", DEFAULT_GEMINI_MODEL),
            ollama: OllamaConfig::default(),
        }
    }

    #[test]
    fn factory_selects_the_requested_variant() {
        let local = create_backend(BackendKind::Ollama, &settings()).expect("ollama backend");
        assert_eq!(local.id(), OLLAMA_BACKEND_ID);

        let cloud = create_backend(BackendKind::Gemini, &settings()).expect("gemini backend");
        assert_eq!(cloud.id(), GEMINI_BACKEND_ID);
    }

    #[test]
    fn factory_propagates_configuration_errors() {
        let mut broken = settings();
        broken.gemini.api_key = String::new();

        let result = create_backend(BackendKind::Gemini, &broken);
        assert!(matches!(result, Err(BackendError::MissingApiKey { .. })));
    }
}
