// Token persistence
// Access and refresh tokens live in a small key-value table so they survive restarts

use std::path::Path;
use std::sync::{Mutex, RwLock};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use super::types::{Credentials, TokenPair};

/// Persistence key for the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Persistence key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Read/write access to the stored tokens.
///
/// Implementations never fail: an unavailable backend reads as empty and
/// ignores writes.
pub trait TokenStore: Send + Sync {
    fn get_access_token(&self) -> Option<String>;
    fn set_access_token(&self, token: &str);
    fn get_refresh_token(&self) -> Option<String>;
    fn set_refresh_token(&self, token: &str);

    /// Remove both tokens
    fn clear(&self);

    fn set_tokens(&self, tokens: &TokenPair) {
        self.set_access_token(&tokens.access_token);
        self.set_refresh_token(&tokens.refresh_token);
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            access_token: self.get_access_token(),
            refresh_token: self.get_refresh_token(),
        }
    }

    fn is_authenticated(&self) -> bool {
        self.get_access_token().is_some()
    }
}

/// In-process token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    credentials: RwLock<Credentials>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access_token: Option<&str>, refresh_token: Option<&str>) -> Self {
        Self {
            credentials: RwLock::new(Credentials {
                access_token: access_token.map(str::to_string),
                refresh_token: refresh_token.map(str::to_string),
            }),
        }
    }

    fn read(&self) -> Credentials {
        match self.credentials.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write(&self, f: impl FnOnce(&mut Credentials)) {
        match self.credentials.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get_access_token(&self) -> Option<String> {
        self.read().access_token
    }

    fn set_access_token(&self, token: &str) {
        self.write(|c| c.access_token = Some(token.to_string()));
    }

    fn get_refresh_token(&self) -> Option<String> {
        self.read().refresh_token
    }

    fn set_refresh_token(&self, token: &str) {
        self.write(|c| c.refresh_token = Some(token.to_string()));
    }

    fn clear(&self) {
        self.write(|c| *c = Credentials::default());
    }
}

/// SQLite-backed token store using an `auth_kv` key-value table
pub struct SqliteTokenStore {
    /// `None` when the database could not be opened
    conn: Option<Mutex<Connection>>,
}

impl SqliteTokenStore {
    /// Open (or create) the token database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create token directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Open the token database, falling back to a detached store on failure
    pub fn open_or_detached(path: &Path) -> Self {
        match Self::open(path) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(
                    "Token storage unavailable, running without persistence: {:#}",
                    e
                );
                Self::detached()
            }
        }
    }

    /// In-memory database, mainly for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::from_connection(conn)
    }

    /// Store with no backing database: reads are empty, writes are ignored
    pub fn detached() -> Self {
        Self { conn: None }
    }

    pub fn is_detached(&self) -> bool {
        self.conn.is_none()
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Some(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Option<T> {
        let conn = self.conn.as_ref()?;
        let guard = match conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match f(&guard) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Token storage error: {}", e);
                None
            }
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()
        })
        .flatten()
    }

    fn set(&self, key: &str, value: &str) {
        let now = chrono::Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auth_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                [key, value, now.as_str()],
            )
        });
    }
}

impl TokenStore for SqliteTokenStore {
    fn get_access_token(&self) -> Option<String> {
        self.get(ACCESS_TOKEN_KEY)
    }

    fn set_access_token(&self, token: &str) {
        self.set(ACCESS_TOKEN_KEY, token);
    }

    fn get_refresh_token(&self) -> Option<String> {
        self.get(REFRESH_TOKEN_KEY)
    }

    fn set_refresh_token(&self, token: &str) {
        self.set(REFRESH_TOKEN_KEY, token);
    }

    fn clear(&self) {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM auth_kv WHERE key IN (?1, ?2)",
                [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY],
            )
        });
    }
}
