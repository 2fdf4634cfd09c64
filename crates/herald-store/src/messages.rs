use rusqlite::{params, OptionalExtension};

use herald_shared::jid::to_api_string;
use herald_shared::{Message, MessageKey};

use crate::database::Store;
use crate::error::{Result, StoreError};

/// Anchor components for an on-demand history sync request: the oldest stored
/// message of a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OldestMessage {
    pub raw_id: String,
    pub chat_jid: String,
    pub from_me: bool,
    pub timestamp: i64,
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let sender_jid: String = row.get(1)?;
    let sender_name: String = row.get(2)?;
    Ok(Message {
        id: row.get(0)?,
        from: to_api_string(&sender_jid),
        sender_name: (!sender_name.is_empty()).then_some(sender_name),
        from_me: row.get(3)?,
        body: row.get(4)?,
        timestamp: row.get(5)?,
        has_media: row.get(6)?,
        media_kind: row.get(7)?,
    })
}

impl Store {
    /// Insert a message or update select fields on conflict.
    ///
    /// `body` and `sender_name` only improve (empty never replaces
    /// non-empty); the media columns are always rewritten because the latest
    /// observation carries the definitive handle for later download.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_message(
        &self,
        id: &str,
        chat_jid: &str,
        sender_jid: &str,
        sender_name: &str,
        from_me: bool,
        body: &str,
        timestamp: i64,
        has_media: bool,
        media_kind: Option<&str>,
        raw_message: Option<&[u8]>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages
                 (id, chat_jid, sender_jid, sender_name, from_me, body, timestamp,
                  has_media, media_kind, raw_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 body        = CASE WHEN excluded.body        != '' THEN excluded.body        ELSE messages.body        END,
                 sender_name = CASE WHEN excluded.sender_name != '' THEN excluded.sender_name ELSE messages.sender_name END,
                 has_media   = excluded.has_media,
                 media_kind  = excluded.media_kind,
                 raw_message = excluded.raw_message",
            params![
                id,
                chat_jid,
                sender_jid,
                sender_name,
                from_me,
                body,
                timestamp,
                has_media,
                media_kind,
                raw_message
            ],
        )?;
        Ok(())
    }

    /// Messages for a chat, newest first. `before_ts` is an inclusive upper
    /// bound on `timestamp` when non-zero.
    pub fn get_messages(&self, chat_jid: &str, limit: i64, before_ts: i64) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt;
        let rows = if before_ts > 0 {
            stmt = conn.prepare(
                "SELECT id, sender_jid, sender_name, from_me, body, timestamp, has_media, media_kind
                 FROM messages
                 WHERE chat_jid = ?1 AND timestamp <= ?2
                 ORDER BY timestamp DESC
                 LIMIT ?3",
            )?;
            stmt.query_map(params![chat_jid, before_ts, limit], row_to_message)?
        } else {
            stmt = conn.prepare(
                "SELECT id, sender_jid, sender_name, from_me, body, timestamp, has_media, media_kind
                 FROM messages
                 WHERE chat_jid = ?1
                 ORDER BY timestamp DESC
                 LIMIT ?2",
            )?;
            stmt.query_map(params![chat_jid, limit], row_to_message)?
        };

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// The stored opaque protocol bytes for a message. NotFound when the row
    /// is missing or carries no payload.
    pub fn raw_message(&self, id: &str) -> Result<Vec<u8>> {
        let raw: Option<Vec<u8>> = self
            .conn()
            .query_row(
                "SELECT raw_message FROM messages WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        match raw {
            Some(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(StoreError::NotFound),
        }
    }

    /// Formatted id of the most recent message in a chat.
    pub fn latest_message_id(&self, chat_jid: &str) -> Result<String> {
        self.conn()
            .query_row(
                "SELECT id FROM messages WHERE chat_jid = ?1 ORDER BY timestamp DESC LIMIT 1",
                params![chat_jid],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// The oldest message in a chat, decomposed into history-anchor parts.
    pub fn oldest_message(&self, chat_jid: &str) -> Result<OldestMessage> {
        let (id, from_me, timestamp): (String, bool, i64) = self
            .conn()
            .query_row(
                "SELECT id, from_me, timestamp FROM messages
                 WHERE chat_jid = ?1
                 ORDER BY timestamp ASC
                 LIMIT 1",
                params![chat_jid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        let key = MessageKey::parse(&id).map_err(|_| StoreError::CorruptMessageId(id))?;
        Ok(OldestMessage {
            raw_id: key.raw_id,
            chat_jid: chat_jid.to_string(),
            from_me,
            timestamp,
        })
    }

    pub fn message_count(&self, chat_jid: &str) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_jid = ?1",
            params![chat_jid],
            |row| row.get(0),
        )?)
    }

    pub fn total_message_count(&self) -> Result<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
    }

    /// Distinct (sender, chat) pairs of lid senders in group chats whose
    /// stored sender name is still empty. Feeds the on-connect backfill.
    pub fn lid_senders_missing_name(&self, limit: i64) -> Result<Vec<(String, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT sender_jid, chat_jid
             FROM messages
             WHERE sender_jid LIKE '%@lid'
                 AND (sender_name = '' OR sender_name IS NULL)
                 AND chat_jid LIKE '%@g.us'
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut pairs = Vec::new();
        for row in rows {
            pairs.push(row?);
        }
        Ok(pairs)
    }

    /// Fill in a resolved sender name, touching only rows still missing one.
    pub fn fill_sender_name(&self, sender_jid: &str, chat_jid: &str, name: &str) -> Result<usize> {
        Ok(self.conn().execute(
            "UPDATE messages SET sender_name = ?1
             WHERE sender_jid = ?2 AND chat_jid = ?3
                 AND (sender_name = '' OR sender_name IS NULL)",
            params![name, sender_jid, chat_jid],
        )?)
    }
}
