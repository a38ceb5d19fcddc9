use snafu::Snafu;

use hearth_llm::BackendError;
use hearth_storage::{SessionId, StorageError};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("session '{session_id}' already has an active stream"))]
    AlreadyStreaming { session_id: SessionId },
    #[snafu(display("message persistence failed at {stage}: {source}"))]
    Persistence {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("backend setup failed at {stage}: {source}"))]
    BackendSetup {
        stage: &'static str,
        source: BackendError,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
