pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{MessageId, SessionId};
pub use sqlite::SqliteStorage;
pub use types::{MessageAuthor, MessageRecord, MessageStatus, NewMessage, NewSession, SessionRecord};

pub trait SessionStore: Send + Sync {
    fn create_session(&self, input: NewSession) -> StorageResult<SessionRecord>;
    fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>>;
    fn get_session(&self, session_id: SessionId) -> StorageResult<Option<SessionRecord>>;
}

pub trait MessageStore: Send + Sync {
    fn append_message(
        &self,
        session_id: SessionId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord>;
    fn list_messages(&self, session_id: SessionId) -> StorageResult<Vec<MessageRecord>>;
}

pub trait ChatStore: SessionStore + MessageStore {}

impl<T> ChatStore for T where T: SessionStore + MessageStore {}
