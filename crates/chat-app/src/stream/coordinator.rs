use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use snafu::Snafu;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

use hearth_llm::{GenerateRequest, GenerationBackend};
use hearth_storage::SessionId;

use super::event::{StreamEvent, StreamFailure};

/// Hand-off channel capacity. Small on purpose: a fast producer is held back
/// once the consumer falls this many fragments behind.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CoordinatorError {
    #[snafu(display("session '{session_id}' already has an active stream"))]
    AlreadyStreaming { session_id: SessionId },
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

struct ActiveWorker {
    cancel_tx: Option<oneshot::Sender<()>>,
    finished: Arc<AtomicBool>,
}

/// Bridges blocking generation calls to the non-blocking consumer.
///
/// One background task per outstanding request pumps backend fragments into a
/// bounded single-producer/single-consumer channel. The coordinator enforces
/// at most one running worker per session and owns the cancellation signals.
pub struct StreamCoordinator {
    runtime: Handle,
    channel_capacity: usize,
    active: HashMap<SessionId, ActiveWorker>,
}

impl StreamCoordinator {
    pub fn new(runtime: Handle) -> Self {
        Self::with_channel_capacity(runtime, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_channel_capacity(runtime: Handle, channel_capacity: usize) -> Self {
        Self {
            runtime,
            channel_capacity: channel_capacity.max(1),
            active: HashMap::new(),
        }
    }

    /// Spawns a worker streaming `request` against `backend`.
    ///
    /// Fails with `AlreadyStreaming`, performing no work, if a worker for this
    /// session has not yet emitted its terminal event.
    pub fn start_stream(
        &mut self,
        session_id: SessionId,
        request: GenerateRequest,
        backend: Arc<dyn GenerationBackend>,
    ) -> CoordinatorResult<StreamHandle> {
        if let Some(worker) = self.active.get(&session_id)
            && !worker.finished.load(Ordering::Acquire)
        {
            return AlreadyStreamingSnafu { session_id }.fail();
        }

        let (event_tx, event_rx) = mpsc::channel(self.channel_capacity);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let finished = Arc::new(AtomicBool::new(false));

        self.runtime.spawn(run_stream_worker(
            backend,
            session_id,
            request,
            event_tx,
            cancel_rx,
            Arc::clone(&finished),
        ));

        self.active.insert(
            session_id,
            ActiveWorker {
                cancel_tx: Some(cancel_tx),
                finished,
            },
        );

        Ok(StreamHandle {
            session_id,
            events: event_rx,
            saw_terminal: false,
        })
    }

    /// Requests cooperative cancellation of the session's active worker.
    ///
    /// The worker observes the signal at its next fragment boundary, emits no
    /// further chunks, and still emits exactly one terminal event. Returns
    /// false when there is nothing to cancel.
    pub fn cancel(&mut self, session_id: SessionId) -> bool {
        let Some(worker) = self.active.get_mut(&session_id) else {
            return false;
        };

        worker
            .cancel_tx
            .take()
            .map(|cancel_tx| cancel_tx.send(()).is_ok())
            .unwrap_or(false)
    }

    pub fn is_streaming(&self, session_id: SessionId) -> bool {
        self.active
            .get(&session_id)
            .is_some_and(|worker| !worker.finished.load(Ordering::Acquire))
    }

    /// Forgets the session's worker registration so the registry does not
    /// grow with session count. Call only after the stream's terminal event
    /// has been drained; dropping the registration of a live worker would
    /// cancel it.
    pub fn release(&mut self, session_id: SessionId) {
        self.active.remove(&session_id);
    }
}

/// Consumer side of the hand-off channel.
pub struct StreamHandle {
    session_id: SessionId,
    events: mpsc::Receiver<StreamEvent>,
    saw_terminal: bool,
}

impl StreamHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Non-blocking receive, polled by the consumer on its own schedule.
    ///
    /// A channel that closes without a terminal event means the worker died;
    /// that is reported once as a synthesized terminal error so the consumer's
    /// bookkeeping is never left dangling.
    pub fn try_receive(&mut self) -> Option<StreamEvent> {
        match self.events.try_recv() {
            Ok(event) => {
                if event.is_terminal() {
                    self.saw_terminal = true;
                }
                Some(event)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if self.saw_terminal {
                    return None;
                }
                self.saw_terminal = true;
                Some(StreamEvent::Error(StreamFailure::Backend {
                    message: "stream closed before a terminal event".to_string(),
                }))
            }
        }
    }
}

async fn run_stream_worker(
    backend: Arc<dyn GenerationBackend>,
    session_id: SessionId,
    request: GenerateRequest,
    event_tx: mpsc::Sender<StreamEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
    finished: Arc<AtomicBool>,
) {
    let terminal = pump_fragments(backend, session_id, request, &event_tx, &mut cancel_rx).await;

    // Mark the worker done before the terminal event becomes visible, so a
    // consumer that drains it observes the registry already settled.
    finished.store(true, Ordering::Release);

    if let Some(event) = terminal {
        // A dropped handle needs no terminal; the send failing is fine.
        let _ = event_tx.send(event).await;
    }
}

/// Forwards fragments until a terminal condition is reached, returning the
/// terminal event to emit (or None when the consumer dropped the handle).
async fn pump_fragments(
    backend: Arc<dyn GenerationBackend>,
    session_id: SessionId,
    request: GenerateRequest,
    event_tx: &mpsc::Sender<StreamEvent>,
    cancel_rx: &mut oneshot::Receiver<()>,
) -> Option<StreamEvent> {
    let opened = tokio::select! {
        _ = &mut *cancel_rx => {
            tracing::debug!(session_id = %session_id, "stream cancelled before backend opened");
            return Some(cancelled_event());
        }
        opened = backend.open_stream(request) => opened,
    };

    let mut fragments = match opened {
        Ok(fragments) => fragments,
        Err(error) => {
            tracing::error!(
                session_id = %session_id,
                backend_id = backend.id(),
                error = %error,
                "failed to open backend stream"
            );
            return Some(StreamEvent::Error(StreamFailure::Backend {
                message: error.to_string(),
            }));
        }
    };

    loop {
        tokio::select! {
            _ = &mut *cancel_rx => {
                tracing::debug!(session_id = %session_id, "stream cancelled");
                return Some(cancelled_event());
            }
            next_item = fragments.next() => {
                match next_item {
                    Some(Ok(text)) => {
                        // Bounded send: backpressure against a fast producer, but
                        // cancellation must still be observable while blocked.
                        tokio::select! {
                            _ = &mut *cancel_rx => return Some(cancelled_event()),
                            sent = event_tx.send(StreamEvent::Chunk(text)) => {
                                if sent.is_err() {
                                    return None;
                                }
                            }
                        }
                    }
                    Some(Err(error)) => {
                        tracing::warn!(
                            session_id = %session_id,
                            error = %error,
                            "backend stream emitted an error chunk"
                        );
                        return Some(StreamEvent::Error(StreamFailure::Backend {
                            message: error.to_string(),
                        }));
                    }
                    None => return Some(StreamEvent::Done),
                }
            }
        }
    }
}

fn cancelled_event() -> StreamEvent {
    StreamEvent::Error(StreamFailure::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::ScriptedBackend;
    use std::time::Duration;

    fn coordinator() -> StreamCoordinator {
        StreamCoordinator::new(Handle::current())
    }

    async fn drain_until_terminal(handle: &mut StreamHandle) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for _ in 0..1_000 {
            match handle.try_receive() {
                Some(event) => {
                    let terminal = event.is_terminal();
                    events.push(event);
                    if terminal {
                        return events;
                    }
                }
                None => tokio::time::sleep(Duration::from_millis(2)).await,
            }
        }
        panic!("stream never reached a terminal event; got {events:?}");
    }

    #[tokio::test]
    async fn fragments_arrive_in_emission_order_with_one_done() {
        let mut coordinator = coordinator();
        let session_id = SessionId::new_v7();
        let backend = ScriptedBackend::fragments(["Safety ", "is good."]);

        let mut handle = coordinator
            .start_stream(session_id, GenerateRequest::new("q", ""), backend)
            .expect("start stream");

        let events = drain_until_terminal(&mut handle).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Chunk("Safety ".to_string()),
                StreamEvent::Chunk("is good.".to_string()),
                StreamEvent::Done,
            ]
        );

        // No second terminal: polling past the end keeps returning nothing.
        for _ in 0..10 {
            assert_eq!(handle.try_receive(), None);
        }
    }

    #[tokio::test]
    async fn mid_stream_backend_error_becomes_the_terminal_event() {
        let mut coordinator = coordinator();
        let session_id = SessionId::new_v7();
        let backend = ScriptedBackend::fragments_then_error(["partial "], "timeout");

        let mut handle = coordinator
            .start_stream(session_id, GenerateRequest::new("q", ""), backend)
            .expect("start stream");

        let events = drain_until_terminal(&mut handle).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Chunk("partial ".to_string()));
        assert!(matches!(
            events[1],
            StreamEvent::Error(StreamFailure::Backend { .. })
        ));
    }

    #[tokio::test]
    async fn second_start_for_a_running_session_is_rejected() {
        let mut coordinator = coordinator();
        let session_id = SessionId::new_v7();

        let mut handle = coordinator
            .start_stream(
                session_id,
                GenerateRequest::new("q", ""),
                ScriptedBackend::never_ending(),
            )
            .expect("start first stream");

        let second = coordinator.start_stream(
            session_id,
            GenerateRequest::new("q2", ""),
            ScriptedBackend::fragments(["ignored"]),
        );
        assert!(matches!(
            second,
            Err(CoordinatorError::AlreadyStreaming { .. })
        ));

        // The original stream is untouched by the rejected start.
        assert!(coordinator.is_streaming(session_id));
        assert_eq!(handle.try_receive(), None);

        coordinator.cancel(session_id);
        let events = drain_until_terminal(&mut handle).await;
        assert_eq!(events, vec![StreamEvent::Error(StreamFailure::Cancelled)]);
    }

    #[tokio::test]
    async fn cancel_yields_exactly_one_terminal_event() {
        let mut coordinator = coordinator();
        let session_id = SessionId::new_v7();

        let mut handle = coordinator
            .start_stream(
                session_id,
                GenerateRequest::new("q", ""),
                ScriptedBackend::never_ending(),
            )
            .expect("start stream");

        assert!(coordinator.cancel(session_id));
        let events = drain_until_terminal(&mut handle).await;
        assert_eq!(events, vec![StreamEvent::Error(StreamFailure::Cancelled)]);

        for _ in 0..10 {
            assert_eq!(handle.try_receive(), None);
        }

        // A second cancel has nothing left to signal.
        assert!(!coordinator.cancel(session_id));
    }

    #[tokio::test]
    async fn release_frees_the_session_for_a_new_stream() {
        let mut coordinator = coordinator();
        let session_id = SessionId::new_v7();

        let mut handle = coordinator
            .start_stream(
                session_id,
                GenerateRequest::new("q", ""),
                ScriptedBackend::fragments(["only"]),
            )
            .expect("start stream");
        drain_until_terminal(&mut handle).await;
        coordinator.release(session_id);

        assert!(!coordinator.is_streaming(session_id));
        coordinator
            .start_stream(
                session_id,
                GenerateRequest::new("next", ""),
                ScriptedBackend::fragments(["again"]),
            )
            .expect("restart after release");
    }

    #[tokio::test]
    async fn open_failure_surfaces_as_a_single_error_event() {
        let mut coordinator = coordinator();
        let session_id = SessionId::new_v7();

        let mut handle = coordinator
            .start_stream(
                session_id,
                GenerateRequest::new("q", ""),
                ScriptedBackend::failing_to_open("boom"),
            )
            .expect("start stream");

        let events = drain_until_terminal(&mut handle).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            StreamEvent::Error(StreamFailure::Backend { .. })
        ));
    }
}
