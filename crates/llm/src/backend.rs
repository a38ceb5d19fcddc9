use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use futures::StreamExt;
use futures::stream::BoxStream;
use rig::completion::CompletionError;
use rig::streaming::StreamedAssistantContent;
use snafu::Snafu;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lazy, finite sequence of generated text fragments.
///
/// The sequence is not restartable; dropping it abandons the underlying
/// provider call, which is how callers cancel in-flight generation.
pub type FragmentStream = BoxStream<'static, BackendResult<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub context: String,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: context.into(),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("missing API key for backend '{backend_id}'"))]
    MissingApiKey {
        stage: &'static str,
        backend_id: &'static str,
    },
    #[snafu(display("generation request has an empty prompt"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("backend '{raw}' is not supported"))]
    UnsupportedBackend { stage: &'static str, raw: String },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: CompletionError,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Pluggable generation engine producing the fragment sequence.
///
/// Implementations must guarantee the sequence eventually terminates, either
/// normally or with an error item; they must never block a consumer that has
/// stopped polling the stream.
pub trait GenerationBackend: Send + Sync {
    fn id(&self) -> &'static str;
    fn label(&self) -> &'static str;
    fn model_id(&self) -> &str;
    fn open_stream(&self, request: GenerateRequest) -> BoxFuture<'_, BackendResult<FragmentStream>>;
}

/// Runtime-visible choice between the two named backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Ollama,
    Gemini,
}

impl BackendKind {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Gemini => "gemini",
        }
    }
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(raw: &str) -> BackendResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "gemini" => Ok(Self::Gemini),
            _ => UnsupportedBackendSnafu {
                stage: "parse-backend-kind",
                raw: raw.to_string(),
            }
            .fail(),
        }
    }
}

pub(crate) fn into_fragment_stream<S, R>(stream: S) -> FragmentStream
where
    S: futures::Stream<Item = Result<StreamedAssistantContent<R>, CompletionError>>
        + Send
        + 'static,
    R: Clone + Unpin + Send + 'static,
{
    stream
        .filter_map(|item| async move {
            match item {
                Ok(content) => map_fragment(content).map(Ok),
                Err(source) => Some(Err(BackendError::CompletionsFailed {
                    stage: "stream-chunk",
                    source,
                })),
            }
        })
        .boxed()
}

fn map_fragment<R>(item: StreamedAssistantContent<R>) -> Option<String>
where
    R: Clone + Unpin,
{
    match item {
        StreamedAssistantContent::Text(text) => Some(text.text),
        // Reasoning and tool traffic never reach the chat transcript.
        StreamedAssistantContent::Reasoning(_)
        | StreamedAssistantContent::ReasoningDelta { .. }
        | StreamedAssistantContent::ToolCall { .. }
        | StreamedAssistantContent::ToolCallDelta { .. }
        | StreamedAssistantContent::Final(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_known_names_case_insensitively() {
        assert_eq!("ollama".parse::<BackendKind>().unwrap(), BackendKind::Ollama);
        assert_eq!("Gemini".parse::<BackendKind>().unwrap(), BackendKind::Gemini);
        assert_eq!(" GEMINI ".parse::<BackendKind>().unwrap(), BackendKind::Gemini);
    }

    #[test]
    fn backend_kind_rejects_unknown_names() {
        let result = "claude".parse::<BackendKind>();
        assert!(matches!(
            result,
            Err(BackendError::UnsupportedBackend { .. })
        ));
    }

    #[test]
    fn backend_kind_id_roundtrips() {
        for kind in [BackendKind::Ollama, BackendKind::Gemini] {
            assert_eq!(kind.id().parse::<BackendKind>().unwrap(), kind);
        }
    }
}
