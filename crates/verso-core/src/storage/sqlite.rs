use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::{Result, VersoError};

/// Bumped whenever `create_tables` changes shape.
pub const SCHEMA_VERSION: i32 = 2;

/// SQLite-backed storage for users, poems, chat sessions, and turns.
///
/// Uses a single `Connection` behind `Arc<Mutex<>>` so it can be shared
/// across async tasks. All blocking SQLite calls go through
/// [`with_conn`](Self::with_conn) which runs them on the Tokio blocking
/// thread-pool. Cloning is cheap and shares the connection.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteStorage {
    /// Open (or create) a file-backed SQLite database at `path`.
    ///
    /// Sets WAL journal mode and enables foreign keys, then creates all
    /// tables and indexes if they don't already exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .map_err(|e| VersoError::Storage(format!("failed to open SQLite database: {e}")))?;

        Self::configure_and_init(conn, path)
    }

    /// Open an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            VersoError::Storage(format!("failed to open in-memory SQLite database: {e}"))
        })?;

        Self::configure_and_init(conn, PathBuf::from(":memory:"))
    }

    /// Return the path this database was opened with (`:memory:` for in-memory).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `user_version` recorded in the database file.
    pub async fn schema_version(&self) -> Result<i32> {
        self.with_conn(|conn| {
            conn.query_row("PRAGMA user_version", [], |row| row.get(0))
                .map_err(|e| VersoError::Storage(format!("failed to read schema version: {e}")))
        })
        .await
    }

    // ── helpers ────────────────────────────────────────────────────────

    /// Shared initialisation: pragmas + table creation.
    fn configure_and_init(conn: Connection, path: PathBuf) -> Result<Self> {
        // WAL mode for better concurrent-read performance.
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| VersoError::Storage(format!("failed to set WAL mode: {e}")))?;

        // Sessions and turns cascade with their poem.
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| VersoError::Storage(format!("failed to enable foreign keys: {e}")))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };

        storage.create_tables()?;
        Ok(storage)
    }

    /// Create all tables and indexes (idempotent).
    fn create_tables(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| VersoError::Storage(format!("failed to acquire database lock: {e}")))?;

        let found: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| VersoError::Storage(format!("failed to read schema version: {e}")))?;

        // Version 1 databases predate the profile columns.
        if found == 1 {
            conn.execute_batch(
                "
                ALTER TABLE users ADD COLUMN about TEXT NOT NULL DEFAULT '';
                ALTER TABLE users ADD COLUMN show_all_tab INTEGER NOT NULL DEFAULT 0;
                ALTER TABLE users ADD COLUMN pinned_poem_id INTEGER REFERENCES poems(id) ON DELETE SET NULL;
                ",
            )
            .map_err(|e| VersoError::Storage(format!("failed to migrate schema v1: {e}")))?;
            tracing::info!("migrated database schema from v1 to v{SCHEMA_VERSION}");
        }

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                about TEXT NOT NULL DEFAULT '',
                show_all_tab INTEGER NOT NULL DEFAULT 0,
                pinned_poem_id INTEGER REFERENCES poems(id) ON DELETE SET NULL
            );

            CREATE TABLE IF NOT EXISTS poems (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                poem_id INTEGER NOT NULL REFERENCES poems(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS poem_reads (
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                poem_id INTEGER NOT NULL REFERENCES poems(id) ON DELETE CASCADE,
                read_at TEXT NOT NULL,
                PRIMARY KEY (user_id, poem_id)
            );

            CREATE INDEX IF NOT EXISTS idx_poems_title ON poems(title);
            CREATE INDEX IF NOT EXISTS idx_sessions_owner_poem
                ON chat_sessions(user_id, poem_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_turns_session_order
                ON turns(session_id, created_at, id);
            ",
        )
        .map_err(|e| VersoError::Storage(format!("failed to create tables: {e}")))?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| VersoError::Storage(format!("failed to record schema version: {e}")))?;

        Ok(())
    }

    /// Run a blocking closure against the SQLite connection on the Tokio
    /// blocking thread-pool. Every query in this module goes through here.
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                VersoError::Storage(format!("failed to acquire database lock: {e}"))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| VersoError::Storage(format!("task join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_creates_tables() {
        let storage = SqliteStorage::open_in_memory().expect("should open in-memory DB");
        assert_eq!(storage.path().to_str().unwrap(), ":memory:");

        let conn = storage.conn.lock().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in ["users", "poems", "chat_sessions", "turns", "poem_reads"] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn create_tables_is_idempotent() {
        let storage = SqliteStorage::open_in_memory().expect("should open in-memory DB");
        storage.create_tables().expect("idempotent create_tables");
    }

    #[tokio::test]
    async fn schema_version_is_recorded() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert_eq!(storage.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let result = storage
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO turns (session_id, role, content, created_at)
                     VALUES ('no-such-session', 'user', 'hi', '2026-01-01T00:00:00.000000Z')",
                    [],
                )
                .map_err(|e| VersoError::Storage(e.to_string()))
            })
            .await;
        assert!(result.is_err(), "orphan turn must be rejected");
    }

    #[tokio::test]
    async fn version_one_database_gains_profile_columns() {
        let dir = std::env::temp_dir().join(format!("verso-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join("v1.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "
                CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    is_admin INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );
                INSERT INTO users (username, password_hash, is_admin, created_at)
                    VALUES ('anna', 'h', 1, '2026-01-01T00:00:00.000000Z');
                PRAGMA user_version = 1;
                ",
            )
            .unwrap();
        }

        let storage = SqliteStorage::open(&db_path).unwrap();
        assert_eq!(storage.schema_version().await.unwrap(), SCHEMA_VERSION);
        let anna = storage.find_user_by_name("anna").await.unwrap().unwrap();
        assert!(anna.is_admin);
        assert_eq!(anna.about, "");
        assert!(!anna.show_all_tab);
        assert_eq!(anna.pinned_poem_id, None);

        drop(storage);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn open_file_based_db() {
        let dir = std::env::temp_dir().join(format!("verso-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join("test.db");

        let storage = SqliteStorage::open(&db_path).expect("should open file DB");
        assert_eq!(storage.path(), db_path);

        drop(storage);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
