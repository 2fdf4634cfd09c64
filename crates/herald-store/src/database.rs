//! Database connection management.
//!
//! The [`Store`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations have run before any other operation. WAL journaling plus a 5 s
//! busy timeout is the entire concurrency story: SQLite serialises the single
//! writer, readers proceed concurrently, and callers need no external lock.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;
use crate::migrations;

/// FTS index over message bodies, kept consistent with `messages` by
/// triggers. Created outside the numbered migrations: SQLite builds without
/// the fts5 module must still open the store (only search degrades).
const FTS_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts
    USING fts5(body, content=messages, content_rowid=rowid);

CREATE TRIGGER IF NOT EXISTS messages_fts_ai AFTER INSERT ON messages BEGIN
    INSERT INTO messages_fts(rowid, body) VALUES (new.rowid, new.body);
END;

CREATE TRIGGER IF NOT EXISTS messages_fts_ad AFTER DELETE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, body) VALUES('delete', old.rowid, old.body);
END;

CREATE TRIGGER IF NOT EXISTS messages_fts_au AFTER UPDATE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, body) VALUES('delete', old.rowid, old.body);
    INSERT INTO messages_fts(rowid, body) VALUES (new.rowid, new.body);
END;
"#;

/// SQLite data access layer for the bridge.
pub struct Store {
    conn: Mutex<Connection>,
    fts_enabled: bool,
}

impl Store {
    /// Open (or create) the database at `<data_dir>/app.db`.
    ///
    /// The data directory is created with mode 0700; it also holds the API
    /// key and the protocol engine's own session store.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        let db_path = data_dir.join("app.db");
        tracing::info!(path = %db_path.display(), "opening application database");
        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_millis(5000))?;

        migrations::run_migrations(&conn)?;

        let fts_enabled = ensure_fts(&conn);
        if fts_enabled {
            rebuild_fts_if_stale(&conn)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
            fts_enabled,
        })
    }

    /// Whether the full-text index exists in this build.
    pub fn fts_enabled(&self) -> bool {
        self.fts_enabled
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn now_ts() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Create the FTS table and triggers, tolerating SQLite builds without fts5.
fn ensure_fts(conn: &Connection) -> bool {
    match conn.execute_batch(FTS_SQL) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "FTS5 unavailable, search is disabled");
            false
        }
    }
}

/// One-time FTS population: rebuild the index if it is empty but the messages
/// table is not. 'rebuild' is the supported way to populate a content= table,
/// and covers installations whose index was created after their data.
fn rebuild_fts_if_stale(conn: &Connection) -> Result<()> {
    let fts_count: i64 = conn.query_row("SELECT COUNT(*) FROM messages_fts", [], |r| r.get(0))?;
    if fts_count != 0 {
        return Ok(());
    }
    let msg_count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?;
    if msg_count == 0 {
        return Ok(());
    }

    conn.execute("INSERT INTO messages_fts(messages_fts) VALUES('rebuild')", [])?;
    tracing::info!(messages = msg_count, "rebuilt FTS index");
    Ok(())
}
