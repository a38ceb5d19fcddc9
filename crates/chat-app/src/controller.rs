use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::ResultExt;

use hearth_llm::{
    BackendKind, BackendSettings, GenerateRequest, GenerationBackend, create_backend,
};
use hearth_storage::{
    ChatStore, MessageAuthor, MessageRecord, MessageStatus, NewMessage, NewSession, SessionId,
    SessionRecord,
};

use crate::error::{
    AlreadyStreamingSnafu, BackendSetupSnafu, ChatError, ChatResult, PersistenceSnafu,
};
use crate::presenter::Presenter;
use crate::stream::coordinator::{StreamCoordinator, StreamHandle};
use crate::stream::event::{StreamEvent, StreamFailure};
use crate::stream::state::{StreamState, StreamStatus};

/// Greeting persisted into freshly bootstrapped sessions.
pub const WELCOME_MESSAGE: &str =
    "Hello! I'm your Real Estate Assistant. How can I help you today?";

/// Consumer-visible activity for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionActivity {
    Idle,
    Streaming,
}

struct LiveStream {
    handle: StreamHandle,
    state: StreamState,
    failure: Option<StreamFailure>,
}

/// Single-threaded consumer driving the chat state machine.
///
/// All MessageStore writes and all presenter notifications happen here, on the
/// caller's thread; background workers only ever touch the hand-off channel.
pub struct SessionController {
    store: Arc<dyn ChatStore>,
    coordinator: StreamCoordinator,
    backend: Arc<dyn GenerationBackend>,
    backend_settings: BackendSettings,
    data_context: String,
    presenter: Box<dyn Presenter>,
    streams: HashMap<SessionId, LiveStream>,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn ChatStore>,
        coordinator: StreamCoordinator,
        backend: Arc<dyn GenerationBackend>,
        backend_settings: BackendSettings,
        data_context: String,
        presenter: Box<dyn Presenter>,
    ) -> Self {
        Self {
            store,
            coordinator,
            backend,
            backend_settings,
            data_context,
            presenter,
            streams: HashMap::new(),
        }
    }

    pub fn create_session(&mut self, name: impl Into<String>) -> ChatResult<SessionRecord> {
        let mut name = name.into();
        if name.trim().is_empty() {
            name = default_session_name();
        }

        self.store
            .create_session(NewSession { name })
            .context(PersistenceSnafu {
                stage: "create-session",
            })
    }

    /// Creates a session and seeds it with the persisted assistant greeting,
    /// the way the "new chat" action bootstraps a conversation.
    pub fn create_session_with_welcome(
        &mut self,
        name: impl Into<String>,
    ) -> ChatResult<SessionRecord> {
        let session = self.create_session(name)?;

        self.store
            .append_message(
                session.id,
                NewMessage {
                    author: MessageAuthor::Assistant,
                    content: WELCOME_MESSAGE.to_string(),
                    status: MessageStatus::Complete,
                    created_at_unix_ms: now_unix_ms(),
                },
            )
            .context(PersistenceSnafu {
                stage: "create-session-welcome",
            })?;

        Ok(session)
    }

    pub fn list_sessions(&self) -> ChatResult<Vec<SessionRecord>> {
        self.store.list_sessions().context(PersistenceSnafu {
            stage: "list-sessions",
        })
    }

    pub fn list_messages(&self, session_id: SessionId) -> ChatResult<Vec<MessageRecord>> {
        self.store
            .list_messages(session_id)
            .context(PersistenceSnafu {
                stage: "list-messages",
            })
    }

    pub fn activity(&self, session_id: SessionId) -> SessionActivity {
        if self.streams.contains_key(&session_id) {
            SessionActivity::Streaming
        } else {
            SessionActivity::Idle
        }
    }

    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }

    pub fn backend_label(&self) -> &str {
        self.backend.label()
    }

    /// Switches the generation backend. Streams already in flight keep the
    /// backend they started with; persisted history is unaffected.
    pub fn set_backend(&mut self, kind: BackendKind) -> ChatResult<()> {
        let backend = create_backend(kind, &self.backend_settings).context(BackendSetupSnafu {
            stage: "set-backend",
        })?;

        tracing::info!(
            backend_id = backend.id(),
            model_id = backend.model_id(),
            "switched generation backend"
        );
        self.backend = backend;
        Ok(())
    }

    /// Persists the user message synchronously, then starts the paired
    /// assistant stream. Rejects with `AlreadyStreaming` while a stream for
    /// this session is outstanding.
    pub fn submit(&mut self, session_id: SessionId, prompt: impl Into<String>) -> ChatResult<()> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            tracing::debug!(session_id = %session_id, "ignoring empty prompt");
            return Ok(());
        }

        if self.streams.contains_key(&session_id) {
            return AlreadyStreamingSnafu { session_id }.fail();
        }

        // The user message must be durable before generation begins, so a
        // crash mid-stream can never lose it.
        self.store
            .append_message(
                session_id,
                NewMessage {
                    author: MessageAuthor::User,
                    content: prompt.clone(),
                    status: MessageStatus::Complete,
                    created_at_unix_ms: now_unix_ms(),
                },
            )
            .context(PersistenceSnafu {
                stage: "submit-append-user",
            })?;

        let request = GenerateRequest::new(prompt, self.data_context.clone());
        let handle = self
            .coordinator
            .start_stream(session_id, request, Arc::clone(&self.backend))
            .map_err(|_| ChatError::AlreadyStreaming { session_id })?;

        tracing::info!(
            session_id = %session_id,
            backend_id = self.backend.id(),
            "stream started"
        );

        self.streams.insert(
            session_id,
            LiveStream {
                handle,
                state: StreamState::new(session_id),
                failure: None,
            },
        );
        Ok(())
    }

    /// Requests cooperative cancellation of the session's active stream.
    /// The terminal event still arrives through `poll`.
    pub fn cancel(&mut self, session_id: SessionId) -> bool {
        self.coordinator.cancel(session_id)
    }

    /// Drains pending stream events for one session.
    ///
    /// Never blocks: with no event pending it returns `Streaming` and the
    /// caller re-polls on its own periodic tick. On the terminal event the
    /// assembled message is persisted exactly once; if that write fails the
    /// accumulated text is retained and the same save is retried on the next
    /// poll without re-invoking the backend.
    pub fn poll(&mut self, session_id: SessionId) -> ChatResult<SessionActivity> {
        let reached_terminal = {
            let Some(live) = self.streams.get_mut(&session_id) else {
                return Ok(SessionActivity::Idle);
            };

            if live.state.status() == StreamStatus::Running {
                let mut reached_terminal = false;
                while let Some(event) = live.handle.try_receive() {
                    match event {
                        StreamEvent::Chunk(text) => {
                            if live.state.append_chunk(&text).is_ok() {
                                self.presenter
                                    .stream_text_changed(session_id, live.state.text());
                            }
                        }
                        StreamEvent::Done => {
                            let _ = live.state.complete();
                            reached_terminal = true;
                            break;
                        }
                        StreamEvent::Error(failure) => {
                            let _ = live.state.fail();
                            live.failure = Some(failure);
                            reached_terminal = true;
                            break;
                        }
                    }
                }
                reached_terminal
            } else {
                // Terminal already drained; a previous persist attempt failed.
                true
            }
        };

        if reached_terminal {
            self.finish_stream(session_id)
        } else {
            Ok(SessionActivity::Streaming)
        }
    }

    fn finish_stream(&mut self, session_id: SessionId) -> ChatResult<SessionActivity> {
        let (content, status) = {
            let Some(live) = self.streams.get(&session_id) else {
                return Ok(SessionActivity::Idle);
            };

            let status = match &live.failure {
                None => MessageStatus::Complete,
                Some(StreamFailure::Cancelled) => MessageStatus::Cancelled,
                Some(StreamFailure::Backend { .. }) => MessageStatus::Failed,
            };
            (live.state.text().to_string(), status)
        };

        // Partial text is informative even on failure, so it is persisted
        // as-is with the outcome recorded in the status column.
        let record = self
            .store
            .append_message(
                session_id,
                NewMessage {
                    author: MessageAuthor::Assistant,
                    content,
                    status,
                    created_at_unix_ms: now_unix_ms(),
                },
            )
            .context(PersistenceSnafu {
                stage: "finish-stream-append-assistant",
            })?;

        if let Some(live) = self.streams.remove(&session_id) {
            match live.failure {
                None => self.presenter.stream_completed(session_id, &record),
                Some(failure) => self.presenter.stream_failed(session_id, &failure, &record),
            }
        }
        self.coordinator.release(session_id);

        tracing::info!(session_id = %session_id, status = ?status, "stream finished");
        Ok(SessionActivity::Idle)
    }
}

fn default_session_name() -> String {
    format!("Chat {}", chrono::Local::now().format("%Y-%m-%d %H:%M"))
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}
