use std::fmt;

/// Why a stream stopped before completing normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    Backend { message: String },
    Cancelled,
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { message } => write!(formatter, "{message}"),
            Self::Cancelled => write!(formatter, "cancelled by user"),
        }
    }
}

/// Tagged event carried over the hand-off channel from worker to consumer.
///
/// Every started stream delivers zero or more `Chunk` events followed by
/// exactly one terminal tag, either `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    Error(StreamFailure),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}
