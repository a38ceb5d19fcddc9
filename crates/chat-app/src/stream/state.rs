use hearth_storage::SessionId;

/// Lifecycle of one in-flight assistant response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Running,
    Completed,
    Failed,
}

/// Rejection returned when a mutation is applied to a stream that already
/// reached a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotRunning {
    pub status: StreamStatus,
}

pub type StreamStateResult = Result<(), NotRunning>;

/// Ephemeral in-memory record of an in-progress assistant response.
///
/// At most one instance exists per session. Only the single-threaded consumer
/// mutates it; the background worker communicates exclusively through the
/// hand-off channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    session_id: SessionId,
    text: String,
    status: StreamStatus,
}

impl StreamState {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            text: String::new(),
            status: StreamStatus::Running,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    /// Appends one fragment; accepted only while the stream is running.
    pub fn append_chunk(&mut self, chunk: &str) -> StreamStateResult {
        self.ensure_running()?;
        self.text.push_str(chunk);
        Ok(())
    }

    pub fn complete(&mut self) -> StreamStateResult {
        self.ensure_running()?;
        self.status = StreamStatus::Completed;
        Ok(())
    }

    pub fn fail(&mut self) -> StreamStateResult {
        self.ensure_running()?;
        self.status = StreamStatus::Failed;
        Ok(())
    }

    fn ensure_running(&self) -> StreamStateResult {
        match self.status {
            StreamStatus::Running => Ok(()),
            StreamStatus::Completed | StreamStatus::Failed => Err(NotRunning {
                status: self.status,
            }),
        }
    }
}
