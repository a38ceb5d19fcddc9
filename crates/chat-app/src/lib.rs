pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod presenter;
pub mod stream;

pub use config::AppConfig;
pub use controller::{SessionActivity, SessionController, WELCOME_MESSAGE};
pub use error::{ChatError, ChatResult};
pub use presenter::Presenter;
pub use stream::{
    StreamCoordinator, StreamEvent, StreamFailure, StreamHandle, StreamState, StreamStatus,
};
