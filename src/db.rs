//! SQLite store for the ignore list.
//!
//! Ignoring an app hides it from bulk updates and the badge count. The choice
//! survives restarts, so it is kept in `freshen.db` in the data directory.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use rusqlite::{Connection, params};

use crate::bundle::AppId;
use crate::config::project_dirs;

/// Persisted set of ignored application ids
pub trait IgnoreStore: Send + Sync {
    fn ignored(&self) -> Result<HashSet<AppId>>;
    fn set_ignored(&self, app: &AppId, ignored: bool) -> Result<()>;
}

/// Database manager for the ignore list
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Get the database file path
    pub fn db_path() -> Result<PathBuf> {
        let dirs = project_dirs()?;

        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Ok(data_dir.join("freshen.db"))
    }

    /// Open or create the database
    pub fn open() -> Result<Self> {
        let path = Self::db_path()?;
        let conn = Connection::open(&path)?;

        let db = Self::with_connection(conn)?;
        tracing::info!("Opened database at {:?}", path);
        Ok(db)
    }

    /// Database that lives only as long as the process
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS ignored_apps (
                identifier TEXT PRIMARY KEY,
                ignored_on TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database connection lock poisoned"))
    }
}

impl IgnoreStore for Database {
    fn ignored(&self) -> Result<HashSet<AppId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT identifier FROM ignored_apps")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|id| id.map(AppId::new))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    fn set_ignored(&self, app: &AppId, ignored: bool) -> Result<()> {
        let conn = self.conn()?;
        if ignored {
            conn.execute(
                "INSERT OR REPLACE INTO ignored_apps (identifier, ignored_on) VALUES (?, ?)",
                params![app.as_str(), chrono::Utc::now().to_rfc3339()],
            )?;
        } else {
            conn.execute(
                "DELETE FROM ignored_apps WHERE identifier = ?",
                params![app.as_str()],
            )?;
        }
        tracing::debug!("{} ignored = {}", app, ignored);
        Ok(())
    }
}
