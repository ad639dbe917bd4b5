use crate::error::{ExtractError, Result};
use crate::session::{SessionContext, SessionStore};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const CURRENT_VERSION: i64 = 1;

pub struct Db {
    conn: Mutex<Connection>,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ExtractError::Serialization(format!("Bad timestamp '{}': {}", raw, e)))
}

impl Db {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        debug!(path = %db_path.display(), "opened session database");
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO schema_version (version) SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM schema_version LIMIT 1);
            ",
        )?;

        let current_version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap_or(0);

        // Migration 001: session context (one row per flow key)
        if current_version < 1 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS session_context (
                    key TEXT PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                DELETE FROM schema_version;
                INSERT INTO schema_version (version) VALUES (1);
                ",
            )?;
        }

        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.lock();
        let version = conn.query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))?;
        Ok(version)
    }

    pub fn is_current(&self) -> Result<bool> {
        Ok(self.schema_version()? == CURRENT_VERSION)
    }
}

impl SessionStore for Db {
    fn load(&self, key: &str) -> Result<Option<SessionContext>> {
        let conn = self.lock();
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT session_id, created_at, updated_at FROM session_context WHERE key = ?",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        match row {
            Some((session_id, created_at, updated_at)) => Ok(Some(SessionContext {
                session_id,
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
            })),
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, context: &SessionContext) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO session_context (key, session_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET session_id = excluded.session_id, created_at = excluded.created_at, updated_at = excluded.updated_at",
            params![
                key,
                context.session_id,
                context.created_at.to_rfc3339(),
                context.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM session_context WHERE key = ?", params![key])?;
        Ok(())
    }
}
