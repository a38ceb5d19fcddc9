use std::sync::{Arc, Mutex};

use futures::StreamExt;

use hearth_llm::{
    BackendError, BackendResult, BoxFuture, FragmentStream, GenerateRequest, GenerationBackend,
};

enum Script {
    Fragments(Vec<BackendResult<String>>),
    FragmentsThenHang(Vec<BackendResult<String>>),
    NeverEnding,
    FailOpen(String),
}

/// Deterministic in-memory backend for coordinator/controller protocol tests.
pub(crate) struct ScriptedBackend {
    script: Mutex<Option<Script>>,
}

impl ScriptedBackend {
    pub(crate) fn fragments<I, S>(items: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Fragments(
            items.into_iter().map(|item| Ok(item.into())).collect(),
        ))
    }

    pub(crate) fn fragments_then_error<I, S>(items: I, message: &str) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut scripted: Vec<BackendResult<String>> =
            items.into_iter().map(|item| Ok(item.into())).collect();
        scripted.push(Err(scripted_error(message)));
        Self::with_script(Script::Fragments(scripted))
    }

    pub(crate) fn fragments_then_hang<I, S>(items: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::FragmentsThenHang(
            items.into_iter().map(|item| Ok(item.into())).collect(),
        ))
    }

    pub(crate) fn never_ending() -> Arc<Self> {
        Self::with_script(Script::NeverEnding)
    }

    pub(crate) fn failing_to_open(message: &str) -> Arc<Self> {
        Self::with_script(Script::FailOpen(message.to_string()))
    }

    fn with_script(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
        })
    }
}

fn scripted_error(message: &str) -> BackendError {
    BackendError::UnsupportedBackend {
        stage: "scripted-backend",
        raw: message.to_string(),
    }
}

impl GenerationBackend for ScriptedBackend {
    fn id(&self) -> &'static str {
        "scripted"
    }

    fn label(&self) -> &'static str {
        "Scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    fn open_stream(&self, _request: GenerateRequest) -> BoxFuture<'_, BackendResult<FragmentStream>> {
        let script = self
            .script
            .lock()
            .expect("script lock")
            .take()
            .expect("scripted backend opened twice");

        Box::pin(async move {
            match script {
                Script::Fragments(items) => Ok(futures::stream::iter(items).boxed()),
                Script::FragmentsThenHang(items) => Ok(futures::stream::iter(items)
                    .chain(futures::stream::pending())
                    .boxed()),
                Script::NeverEnding => Ok(futures::stream::pending().boxed()),
                Script::FailOpen(message) => Err(scripted_error(&message)),
            }
        })
    }
}
