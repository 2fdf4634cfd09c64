use rusqlite::params;

use herald_shared::jid::to_api_string;
use herald_shared::Chat;

use crate::database::Store;
use crate::error::Result;

impl Store {
    /// Insert a chat or update it on conflict. `name` keeps its existing
    /// value when the incoming one is empty. The preview pair
    /// (`last_message`, `last_msg_ts`) is applied together and only when the
    /// incoming timestamp is non-null and strictly newer than the stored one,
    /// so out-of-order events can never roll a chat summary backwards.
    pub fn upsert_chat(
        &self,
        jid: &str,
        name: &str,
        is_group: bool,
        last_message: Option<&str>,
        last_msg_ts: Option<i64>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chats (jid, name, is_group, last_message, last_msg_ts, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(jid) DO UPDATE SET
                 name         = CASE WHEN excluded.name != '' THEN excluded.name ELSE chats.name END,
                 is_group     = excluded.is_group,
                 last_message = CASE
                     WHEN excluded.last_msg_ts IS NOT NULL
                         AND (chats.last_msg_ts IS NULL OR excluded.last_msg_ts > chats.last_msg_ts)
                     THEN excluded.last_message
                     ELSE chats.last_message
                 END,
                 last_msg_ts  = CASE
                     WHEN excluded.last_msg_ts IS NOT NULL
                         AND (chats.last_msg_ts IS NULL OR excluded.last_msg_ts > chats.last_msg_ts)
                     THEN excluded.last_msg_ts
                     ELSE chats.last_msg_ts
                 END,
                 updated_at   = excluded.updated_at",
            params![jid, name, is_group, last_message, last_msg_ts, Self::now_ts()],
        )?;
        Ok(())
    }

    /// All chats that are neither lid nor broadcast, most recent first.
    pub fn get_chats(&self) -> Result<Vec<Chat>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ch.jid,
                 COALESCE(NULLIF(ch.name, ''), NULLIF(ct.push_name, ''), NULLIF(ct.name, ''),
                     REPLACE(REPLACE(ch.jid, '@s.whatsapp.net', ''), '@g.us', '')) AS display_name,
                 ch.is_group, ch.unread_count, ch.last_message, ch.last_msg_ts,
                 (SELECT COUNT(*) FROM messages m WHERE m.chat_jid = ch.jid) AS msg_count
             FROM chats ch
             LEFT JOIN contacts ct ON ch.jid = ct.jid
             WHERE ch.jid NOT LIKE '%@lid'
                 AND ch.jid NOT LIKE '%@broadcast'
             ORDER BY COALESCE(ch.last_msg_ts, 0) DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let jid: String = row.get(0)?;
            Ok(Chat {
                id: to_api_string(&jid),
                name: row.get(1)?,
                is_group: row.get(2)?,
                unread_count: row.get(3)?,
                last_message: row.get(4)?,
                last_message_timestamp: row.get(5)?,
                message_count: row.get(6)?,
            })
        })?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    /// Chat JIDs (internal form) that are neither lid nor broadcast.
    pub fn all_chat_jids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT jid FROM chats
             WHERE jid NOT LIKE '%@lid' AND jid NOT LIKE '%@broadcast'
             ORDER BY COALESCE(last_msg_ts, 0) DESC",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut jids = Vec::new();
        for row in rows {
            jids.push(row?);
        }
        Ok(jids)
    }

    pub fn increment_unread(&self, jid: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE chats SET unread_count = unread_count + 1, updated_at = ?1 WHERE jid = ?2",
            params![Self::now_ts(), jid],
        )?;
        Ok(())
    }

    pub fn set_unread(&self, jid: &str, count: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE chats SET unread_count = ?1, updated_at = ?2 WHERE jid = ?3",
            params![count, Self::now_ts(), jid],
        )?;
        Ok(())
    }

    pub fn mark_read(&self, jid: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE chats SET unread_count = 0, updated_at = ?1 WHERE jid = ?2",
            params![Self::now_ts(), jid],
        )?;
        Ok(())
    }

    /// Zero every unread counter; history sync will restore the real values.
    pub fn reset_all_unread(&self) -> Result<()> {
        self.conn().execute(
            "UPDATE chats SET unread_count = 0, updated_at = ?1",
            params![Self::now_ts()],
        )?;
        Ok(())
    }

    /// Overwrite the last-message preview pair unconditionally.
    pub fn update_chat_last_message(&self, jid: &str, body: &str, timestamp: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE chats SET last_message = ?1, last_msg_ts = ?2, updated_at = ?3 WHERE jid = ?4",
            params![body, timestamp, Self::now_ts(), jid],
        )?;
        Ok(())
    }

    /// Group chats that still have no display name.
    pub fn unnamed_group_chats(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT jid FROM chats WHERE is_group = 1 AND (name = '' OR name IS NULL)")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut jids = Vec::new();
        for row in rows {
            jids.push(row?);
        }
        Ok(jids)
    }

    pub fn set_chat_name(&self, jid: &str, name: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE chats SET name = ?1, updated_at = ?2 WHERE jid = ?3",
            params![name, Self::now_ts(), jid],
        )?;
        Ok(())
    }

    /// Remove a chat and all its messages in a single transaction.
    pub fn delete_chat(&self, jid: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE chat_jid = ?1", params![jid])?;
        tx.execute("DELETE FROM chats WHERE jid = ?1", params![jid])?;
        tx.commit()?;
        Ok(())
    }
}
