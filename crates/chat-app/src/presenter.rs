use hearth_storage::{MessageRecord, SessionId};

use crate::stream::StreamFailure;

/// Seam toward the presentation layer.
///
/// The chat window implements this to re-render; callbacks fire only from the
/// single-threaded consumer context, never from background workers, so
/// implementations need no locking around view state.
pub trait Presenter: Send {
    /// Fired whenever the in-flight assistant text grows. Receives the full
    /// accumulated text, so repeated delivery of the same value is harmless.
    fn stream_text_changed(&mut self, session_id: SessionId, text: &str);

    /// Fired once the assembled response has been persisted.
    fn stream_completed(&mut self, session_id: SessionId, message: &MessageRecord);

    /// Fired when a stream ended early; `message` holds the persisted partial
    /// (possibly empty) response.
    fn stream_failed(
        &mut self,
        session_id: SessionId,
        failure: &StreamFailure,
        message: &MessageRecord,
    );
}
