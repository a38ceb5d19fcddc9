use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, FromRow, SqliteConnection, SqlitePool};

use super::error::{
    InvariantViolationSnafu, NotFoundSnafu, SqliteQuerySnafu, SqliteRuntimeInitSnafu,
    SqliteThreadSpawnSnafu,
};
use super::error::{
    CreateSqliteDirectorySnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqlitePragmaSnafu, StorageResult,
};
use super::ids::{MessageId, SessionId};
use super::types::{
    MessageAuthor, MessageRecord, MessageStatus, NewMessage, NewSession, SessionRecord,
};
use super::{MessageStore, SessionStore};

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        // Explicit PRAGMA writes make bootstrap behavior deterministic.
        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Store traits are sync, so each call executes on a dedicated worker thread
        // with its own current-thread runtime to avoid nested-runtime blocking panics.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl SessionStore for SqliteStorage {
    fn create_session(&self, input: NewSession) -> StorageResult<SessionRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("session-create", async move {
            let mut connection =
                connect_store_connection(&database_url, "session-create-connect").await?;
            let session_id = SessionId::new_v7();
            let now = unix_timestamp_millis();

            sqlx::query("INSERT INTO sessions (id, name, created_at) VALUES (?, ?, ?)")
                .bind(session_id.to_string())
                .bind(input.name.clone())
                .bind(now)
                .execute(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "session-create-insert",
                })?;

            Ok(SessionRecord {
                id: session_id,
                name: input.name,
                created_at_unix_ms: i64_to_u64(now, "session-create-created-at")?,
            })
        })
    }

    fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("session-list", async move {
            let mut connection =
                connect_store_connection(&database_url, "session-list-connect").await?;
            let rows = sqlx::query_as::<_, SessionRow>(
                "SELECT id, name, created_at FROM sessions ORDER BY created_at DESC, id DESC",
            )
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-list-query",
            })?;

            rows.into_iter().map(session_row_to_record).collect()
        })
    }

    fn get_session(&self, session_id: SessionId) -> StorageResult<Option<SessionRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("session-get", async move {
            let mut connection =
                connect_store_connection(&database_url, "session-get-connect").await?;
            let row = sqlx::query_as::<_, SessionRow>(
                "SELECT id, name, created_at FROM sessions WHERE id = ?",
            )
            .bind(session_id.to_string())
            .fetch_optional(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-get-query",
            })?;

            row.map(session_row_to_record).transpose()
        })
    }
}

impl MessageStore for SqliteStorage {
    fn append_message(
        &self,
        session_id: SessionId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-append", async move {
            let mut connection =
                connect_store_connection(&database_url, "message-append-connect").await?;
            ensure_session_in_scope(&mut connection, session_id, "message-append-ensure-session")
                .await?;

            let message_id = MessageId::new_v7();
            let created_at = u64_to_i64(input.created_at_unix_ms, "message-append-created-at")?;

            sqlx::query(
                "INSERT INTO messages (id, session_id, author, content, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(message_id.to_string())
            .bind(session_id.to_string())
            .bind(author_to_sql(input.author))
            .bind(input.content.clone())
            .bind(status_to_sql(input.status))
            .bind(created_at)
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-insert",
            })?;

            Ok(MessageRecord {
                id: message_id,
                session_id,
                author: input.author,
                content: input.content,
                status: input.status,
                created_at_unix_ms: input.created_at_unix_ms,
            })
        })
    }

    fn list_messages(&self, session_id: SessionId) -> StorageResult<Vec<MessageRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-list", async move {
            let mut connection =
                connect_store_connection(&database_url, "message-list-connect").await?;
            ensure_session_in_scope(&mut connection, session_id, "message-list-ensure-session")
                .await?;
            let rows = sqlx::query_as::<_, MessageRow>(
                "SELECT id, session_id, author, content, status, created_at FROM messages WHERE session_id = ? ORDER BY created_at ASC, id ASC",
            )
            .bind(session_id.to_string())
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-list-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    name: String,
    created_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    session_id: String,
    author: String,
    content: String,
    status: String,
    created_at: i64,
}

fn session_row_to_record(row: SessionRow) -> StorageResult<SessionRecord> {
    Ok(SessionRecord {
        id: SessionId::parse(&row.id)?,
        name: row.name,
        created_at_unix_ms: i64_to_u64(row.created_at, "session-row-created-at")?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        session_id: SessionId::parse(&row.session_id)?,
        author: author_from_sql(&row.author)?,
        content: row.content,
        status: status_from_sql(&row.status)?,
        created_at_unix_ms: i64_to_u64(row.created_at, "message-row-created-at")?,
    })
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-foreign-keys",
            pragma: "foreign_keys",
        })?;
    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

async fn session_exists(
    connection: &mut SqliteConnection,
    session_id: SessionId,
) -> StorageResult<bool> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT 1 FROM sessions WHERE id = ? LIMIT 1")
        .bind(session_id.to_string())
        .fetch_optional(&mut *connection)
        .await
        .context(SqliteQuerySnafu {
            stage: "session-exists-query",
        })?;

    Ok(existing.is_some())
}

async fn ensure_session_in_scope(
    connection: &mut SqliteConnection,
    session_id: SessionId,
    stage: &'static str,
) -> StorageResult<()> {
    let exists = session_exists(connection, session_id).await?;
    if !exists {
        return NotFoundSnafu {
            stage,
            entity: "session",
            id: session_id.to_string(),
        }
        .fail();
    }

    Ok(())
}

fn author_to_sql(author: MessageAuthor) -> &'static str {
    match author {
        MessageAuthor::User => "user",
        MessageAuthor::Assistant => "assistant",
    }
}

fn author_from_sql(raw: &str) -> StorageResult<MessageAuthor> {
    match raw {
        "user" => Ok(MessageAuthor::User),
        "assistant" => Ok(MessageAuthor::Assistant),
        _ => InvariantViolationSnafu {
            stage: "message-author-from-sql",
            details: format!("unknown message author '{raw}'"),
        }
        .fail(),
    }
}

fn status_to_sql(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Complete => "complete",
        MessageStatus::Failed => "failed",
        MessageStatus::Cancelled => "cancelled",
    }
}

fn status_from_sql(raw: &str) -> StorageResult<MessageStatus> {
    match raw {
        "complete" => Ok(MessageStatus::Complete),
        "failed" => Ok(MessageStatus::Failed),
        "cancelled" => Ok(MessageStatus::Cancelled),
        _ => InvariantViolationSnafu {
            stage: "message-status-from-sql",
            details: format!("unknown message status '{raw}'"),
        }
        .fail(),
    }
}

pub fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_millis() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| super::error::StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> StorageResult<i64> {
    value
        .try_into()
        .map_err(|_| super::error::StorageError::InvariantViolation {
            stage,
            details: format!("u64 '{value}' cannot map to sqlite i64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    async fn open_temp_storage() -> (tempfile::TempDir, SqliteStorage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("chat.db");
        let storage = SqliteStorage::open(db_path.to_str().expect("utf8 path"))
            .await
            .expect("open storage");
        (dir, storage)
    }

    fn message(author: MessageAuthor, content: &str, status: MessageStatus, at: u64) -> NewMessage {
        NewMessage {
            author,
            content: content.to_string(),
            status,
            created_at_unix_ms: at,
        }
    }

    #[tokio::test]
    async fn sessions_list_most_recent_created_first() {
        let (_dir, storage) = open_temp_storage().await;

        let first = storage
            .create_session(NewSession {
                name: "first".to_string(),
            })
            .expect("create first");
        let second = storage
            .create_session(NewSession {
                name: "second".to_string(),
            })
            .expect("create second");

        let listed = storage.list_sessions().expect("list sessions");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn messages_list_in_timestamp_order_regardless_of_insert_order() {
        let (_dir, storage) = open_temp_storage().await;
        let session = storage
            .create_session(NewSession {
                name: "ordering".to_string(),
            })
            .expect("create session");

        storage
            .append_message(
                session.id,
                message(MessageAuthor::Assistant, "later", MessageStatus::Complete, 2_000),
            )
            .expect("append later");
        storage
            .append_message(
                session.id,
                message(MessageAuthor::User, "earlier", MessageStatus::Complete, 1_000),
            )
            .expect("append earlier");

        let listed = storage.list_messages(session.id).expect("list messages");
        let contents = listed
            .iter()
            .map(|record| record.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["earlier", "later"]);
    }

    #[tokio::test]
    async fn append_to_unknown_session_is_rejected() {
        let (_dir, storage) = open_temp_storage().await;

        let result = storage.append_message(
            SessionId::new_v7(),
            message(MessageAuthor::User, "orphan", MessageStatus::Complete, 1),
        );

        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn author_and_status_survive_a_roundtrip() {
        let (_dir, storage) = open_temp_storage().await;
        let session = storage
            .create_session(NewSession {
                name: "roundtrip".to_string(),
            })
            .expect("create session");

        storage
            .append_message(
                session.id,
                message(MessageAuthor::User, "question", MessageStatus::Complete, 10),
            )
            .expect("append user");
        storage
            .append_message(
                session.id,
                message(MessageAuthor::Assistant, "partial", MessageStatus::Failed, 20),
            )
            .expect("append failed assistant");
        storage
            .append_message(
                session.id,
                message(MessageAuthor::Assistant, "stopped", MessageStatus::Cancelled, 30),
            )
            .expect("append cancelled assistant");

        let listed = storage.list_messages(session.id).expect("list messages");
        assert_eq!(listed[0].author, MessageAuthor::User);
        assert_eq!(listed[0].status, MessageStatus::Complete);
        assert_eq!(listed[1].status, MessageStatus::Failed);
        assert_eq!(listed[2].status, MessageStatus::Cancelled);
    }

    #[tokio::test]
    async fn get_session_returns_none_for_unknown_id() {
        let (_dir, storage) = open_temp_storage().await;
        let fetched = storage
            .get_session(SessionId::new_v7())
            .expect("get session");
        assert!(fetched.is_none());
    }
}
