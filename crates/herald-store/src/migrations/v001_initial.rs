//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `contacts`, `chats`, `messages`, and
//! `sync_state`. The FTS index lives outside the numbered migrations because
//! its availability depends on the SQLite build (see `database::ensure_fts`).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Contacts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    jid        TEXT PRIMARY KEY NOT NULL,   -- internal wire form
    name       TEXT NOT NULL DEFAULT '',
    push_name  TEXT NOT NULL DEFAULT '',
    number     TEXT NOT NULL DEFAULT '',
    is_group   INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    updated_at INTEGER NOT NULL DEFAULT 0   -- Unix seconds
);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    jid          TEXT PRIMARY KEY NOT NULL,
    name         TEXT NOT NULL DEFAULT '',
    is_group     INTEGER NOT NULL DEFAULT 0,
    unread_count INTEGER NOT NULL DEFAULT 0,
    last_message TEXT,                      -- preview, capped at write time
    last_msg_ts  INTEGER,                   -- only ever advances
    updated_at   INTEGER NOT NULL DEFAULT 0
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,  -- "<fromMe>_<chatJid>_<rawId>"
    chat_jid    TEXT NOT NULL,
    sender_jid  TEXT NOT NULL DEFAULT '',
    sender_name TEXT NOT NULL DEFAULT '',
    from_me     INTEGER NOT NULL DEFAULT 0,
    body        TEXT NOT NULL DEFAULT '',
    timestamp   INTEGER NOT NULL DEFAULT 0, -- Unix seconds
    has_media   INTEGER NOT NULL DEFAULT 0,
    media_kind  TEXT,
    raw_message BLOB                        -- opaque encoded protocol message
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_jid, timestamp DESC);

-- ----------------------------------------------------------------
-- Sync metadata
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sync_state (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
