use rusqlite::params;

use herald_shared::jid::to_api_string;
use herald_shared::{Message, SearchResult};

use crate::database::Store;
use crate::error::{Result, StoreError};

impl Store {
    /// Full-text search across all message bodies, ordered by FTS5 relevance
    /// rank. Joined back to chats/contacts so each hit carries a display chat
    /// name. Fails with [`StoreError::SearchUnavailable`] when the SQLite
    /// build has no fts5 module.
    pub fn search_messages(&self, query: &str, limit: i64) -> Result<Vec<SearchResult>> {
        if !self.fts_enabled() {
            return Err(StoreError::SearchUnavailable);
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.sender_jid, m.sender_name, m.from_me, m.body, m.timestamp,
                 m.has_media, m.media_kind, m.chat_jid,
                 COALESCE(NULLIF(ch.name, ''), NULLIF(ct.push_name, ''), NULLIF(ct.name, ''),
                     REPLACE(REPLACE(m.chat_jid, '@s.whatsapp.net', ''), '@g.us', '')) AS chat_name
             FROM messages_fts fts
             JOIN messages m ON m.rowid = fts.rowid
             LEFT JOIN chats ch ON ch.jid = m.chat_jid
             LEFT JOIN contacts ct ON ct.jid = m.chat_jid
             WHERE messages_fts MATCH ?1
             ORDER BY fts.rank
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![query, limit], |row| {
            let sender_jid: String = row.get(1)?;
            let sender_name: String = row.get(2)?;
            let chat_jid: String = row.get(8)?;
            Ok(SearchResult {
                message: Message {
                    id: row.get(0)?,
                    from: to_api_string(&sender_jid),
                    sender_name: (!sender_name.is_empty()).then_some(sender_name),
                    from_me: row.get(3)?,
                    body: row.get(4)?,
                    timestamp: row.get(5)?,
                    has_media: row.get(6)?,
                    media_kind: row.get(7)?,
                },
                chat_name: row.get(9)?,
                chat_jid: to_api_string(&chat_jid),
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::test_store;

    #[test]
    fn search_finds_token_and_reports_api_chat_jid() {
        let (_dir, store) = test_store();
        let chat_a = "10000000001@s.whatsapp.net";
        let chat_b = "10000000002@s.whatsapp.net";

        store.upsert_chat(chat_a, "Alice", false, None, None).unwrap();
        store.upsert_chat(chat_b, "Bob", false, None, None).unwrap();
        store
            .upsert_message(
                "false_10000000001@c.us_A",
                chat_a,
                chat_a,
                "",
                false,
                "hello world",
                100,
                false,
                None,
                None,
            )
            .unwrap();
        store
            .upsert_message(
                "false_10000000002@c.us_B",
                chat_b,
                chat_b,
                "",
                false,
                "goodbye",
                200,
                false,
                None,
                None,
            )
            .unwrap();

        let results = store.search_messages("hello", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message.body, "hello world");
        assert_eq!(results[0].chat_jid, "10000000001@c.us");
        assert_eq!(results[0].chat_name, "Alice");
    }

    #[test]
    fn search_reflects_updates_and_deletes() {
        let (_dir, store) = test_store();
        let chat = "10000000001@s.whatsapp.net";
        let id = "false_10000000001@c.us_A";

        store
            .upsert_message(id, chat, chat, "", false, "draft wording", 100, false, None, None)
            .unwrap();
        store
            .upsert_message(id, chat, chat, "", false, "final wording", 100, false, None, None)
            .unwrap();

        // The index tracks the current body, not historic ones.
        assert_eq!(store.search_messages("final", 10).unwrap().len(), 1);
        assert!(store.search_messages("draft", 10).unwrap().is_empty());

        store.delete_chat(chat).unwrap();
        assert!(store.search_messages("final", 10).unwrap().is_empty());
    }

    #[test]
    fn search_respects_limit() {
        let (_dir, store) = test_store();
        let chat = "10000000001@s.whatsapp.net";
        for i in 0..5 {
            store
                .upsert_message(
                    &format!("false_10000000001@c.us_M{i}"),
                    chat,
                    chat,
                    "",
                    false,
                    "repeated phrase",
                    100 + i,
                    false,
                    None,
                    None,
                )
                .unwrap();
        }
        assert_eq!(store.search_messages("repeated", 3).unwrap().len(), 3);
    }
}
