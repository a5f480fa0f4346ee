// Durable session storage

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::types::Session;

/// Fixed key the session is stored under
pub const SESSION_KEY: &str = "usuario";

/// Persistence backend for the logged-in session
pub trait SessionStorage: Send + Sync {
    /// Load the stored session, if any
    fn load(&self) -> Result<Option<Session>>;

    /// Store the session, replacing any previous one
    fn save(&self, session: &Session) -> Result<()>;

    /// Remove the stored session (no-op when absent)
    fn remove(&self) -> Result<()>;
}

/// Session storage backed by a SQLite key/value table
pub struct SqliteSessionStorage {
    conn: Mutex<Connection>,
}

impl SqliteSessionStorage {
    /// Open (or create) the session database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create session directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// In-memory database, contents are lost on drop
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create session table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Raw stored value, as written
    pub fn raw(&self) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM session_kv WHERE key = ?",
            [SESSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read session from SQLite")
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Session database lock poisoned"))
    }
}

impl SessionStorage for SqliteSessionStorage {
    fn load(&self) -> Result<Option<Session>> {
        match self.raw()? {
            Some(json) => {
                let session = serde_json::from_str(&json)
                    .context("Failed to parse session data from SQLite")?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session).context("Failed to serialize session")?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO session_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [SESSION_KEY, json.as_str()],
        )
        .context("Failed to write session to SQLite")?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM session_kv WHERE key = ?", [SESSION_KEY])
            .context("Failed to delete session from SQLite")?;
        Ok(())
    }
}

/// Session storage kept in process memory
#[derive(Default)]
pub struct MemorySessionStorage {
    value: Mutex<Option<String>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored value, as written
    pub fn raw(&self) -> Option<String> {
        self.value.lock().ok().and_then(|v| v.clone())
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<Session>> {
        match self.raw() {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Failed to parse stored session")?,
            )),
            None => Ok(None),
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session).context("Failed to serialize session")?;
        let mut value = self
            .value
            .lock()
            .map_err(|_| anyhow::anyhow!("Session storage lock poisoned"))?;
        *value = Some(json);
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        let mut value = self
            .value
            .lock()
            .map_err(|_| anyhow::anyhow!("Session storage lock poisoned"))?;
        *value = None;
        Ok(())
    }
}
