use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::task;

use crate::config::NEW_CHAT_TITLE;
use crate::models::{Conversation, ConversationSummary, Message, Role, UnknownRole};

const SQLITE_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to initialize storage: {0}")]
    Init(String),

    #[error("Storage read failed: {0}")]
    Read(#[source] rusqlite::Error),

    #[error("Storage write failed: {0}")]
    Write(#[source] rusqlite::Error),

    #[error("Conversation {0} not found")]
    NotFound(i64),

    #[error("Storage task failed: {0}")]
    Task(#[from] task::JoinError),

    #[error("Failed to encode stored value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Handle to the on-disk conversation store.
///
/// Holds only the path: every operation opens its own connection on the
/// blocking pool and drops it before returning, on success or error.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Init(format!(
                        "Failed to create data directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let db = Database { path };
        db.initialize().await?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(path: &Path) -> rusqlite::Result<Connection> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        Ok(conn)
    }

    /// Ensure the schema exists. Safe to call any number of times.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = Self::connect(&path).map_err(|e| {
                StoreError::Init(format!("Failed to open database at {}: {}", path.display(), e))
            })?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")
                .map_err(|e| StoreError::Init(e.to_string()))?;
            Self::run_migrations(&mut conn).map_err(|e| StoreError::Init(e.to_string()))
        })
        .await?
    }

    fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
        let tx = conn.transaction()?;

        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if version < 1 {
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS conversations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    model TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    conversation_id INTEGER NOT NULL,
                    role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);

                INSERT INTO schema_version (version) VALUES (1);",
            )?;
        }

        if version < 2 {
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                UPDATE schema_version SET version = 2;",
            )?;
        }

        tx.commit()
    }

    async fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Self::connect(&path).map_err(StoreError::Read)?;
            f(&conn).map_err(StoreError::Read)
        })
        .await?
    }

    async fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = Self::connect(&path).map_err(StoreError::Write)?;
            f(&mut conn).map_err(StoreError::Write)
        })
        .await?
    }

    // --- Conversation CRUD ---

    pub async fn create_conversation(&self, model: &str) -> Result<i64, StoreError> {
        let model = model.to_string();
        self.write(move |conn| {
            conn.execute(
                "INSERT INTO conversations (title, model) VALUES (?1, ?2)",
                params![NEW_CHAT_TITLE, model],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, created_at FROM conversations
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ConversationSummary {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        created_at: parse_timestamp(row, 2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn get_conversation(&self, id: i64) -> Result<Conversation, StoreError> {
        let conv = self
            .read(move |conn| {
                conn.query_row(
                    "SELECT id, title, model, created_at FROM conversations WHERE id = ?1",
                    params![id],
                    Self::row_to_conversation,
                )
                .optional()
            })
            .await?;
        conv.ok_or(StoreError::NotFound(id))
    }

    pub async fn get_conversation_model(&self, id: i64) -> Result<String, StoreError> {
        let model: Option<String> = self
            .read(move |conn| {
                conn.query_row(
                    "SELECT model FROM conversations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        model.ok_or(StoreError::NotFound(id))
    }

    pub async fn rename_conversation(&self, id: i64, title: &str) -> Result<(), StoreError> {
        let title = title.to_string();
        let changed = self
            .write(move |conn| {
                conn.execute(
                    "UPDATE conversations SET title = ?1 WHERE id = ?2",
                    params![title, id],
                )
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    pub async fn set_conversation_model(&self, id: i64, model: &str) -> Result<(), StoreError> {
        let model = model.to_string();
        let changed = self
            .write(move |conn| {
                conn.execute(
                    "UPDATE conversations SET model = ?1 WHERE id = ?2",
                    params![model, id],
                )
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Removes the conversation and its messages in one transaction. Nothing
    /// is deleted if any step fails.
    pub async fn delete_conversation(&self, id: i64) -> Result<(), StoreError> {
        let deleted = self
            .write(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM messages WHERE conversation_id = ?1",
                    params![id],
                )?;
                let deleted = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
                if deleted == 0 {
                    // Dropping the transaction rolls it back.
                    return Ok(0);
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await?;
        if deleted == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    // --- Message CRUD ---

    /// Append-only insert. Fails with `Write` if the conversation is absent.
    pub async fn append_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
    ) -> Result<i64, StoreError> {
        let content = content.to_string();
        self.write(move |conn| {
            conn.execute(
                "INSERT INTO messages (conversation_id, role, content) VALUES (?1, ?2, ?3)",
                params![conversation_id, role.as_str(), content],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Messages in creation order, oldest first.
    pub async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, StoreError> {
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, content, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
            )?;
            let messages = stmt
                .query_map(params![conversation_id], Self::row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
        .await
    }

    pub async fn count_messages(&self, conversation_id: i64) -> Result<usize, StoreError> {
        let count: i64 = self
            .read(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                    params![conversation_id],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(count.max(0) as usize)
    }

    // --- Settings ---

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.read(move |conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.write(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    // --- Row helpers ---

    fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
        Ok(Conversation {
            id: row.get(0)?,
            title: row.get(1)?,
            model: row.get(2)?,
            created_at: parse_timestamp(row, 3)?,
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let role_str: String = row.get(2)?;
        let role = Role::from_str(&role_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(UnknownRole(role_str)))
        })?;

        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role,
            content: row.get(3)?,
            created_at: parse_timestamp(row, 4)?,
        })
    }
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, SQLITE_TIMESTAMP)
        .map(|naive| naive.and_utc())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
