/// Worker/channel orchestration for in-flight generation requests.
pub mod coordinator;
/// Event contract carried over the hand-off channel.
pub mod event;
/// Deterministic stream lifecycle state.
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{
    CoordinatorError, CoordinatorResult, DEFAULT_CHANNEL_CAPACITY, StreamCoordinator, StreamHandle,
};
pub use event::{StreamEvent, StreamFailure};
pub use state::{NotRunning, StreamState, StreamStateResult, StreamStatus};
