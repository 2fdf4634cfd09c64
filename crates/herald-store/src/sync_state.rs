use rusqlite::{params, OptionalExtension};

use crate::database::Store;
use crate::error::Result;

impl Store {
    /// Persist a session-manager scratch value (connection timestamps etc.).
    pub fn sync_state_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn sync_state_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// A sync-state value parsed as a Unix timestamp, if present and valid.
    pub fn sync_state_ts(&self, key: &str) -> Result<Option<i64>> {
        Ok(self
            .sync_state_get(key)?
            .and_then(|v| v.parse::<i64>().ok()))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::test_store;

    #[test]
    fn set_get_round_trip() {
        let (_dir, store) = test_store();
        assert_eq!(store.sync_state_get("missing").unwrap(), None);

        store.sync_state_set("last_connected_at", "1700000000").unwrap();
        assert_eq!(
            store.sync_state_get("last_connected_at").unwrap().as_deref(),
            Some("1700000000")
        );
        assert_eq!(
            store.sync_state_ts("last_connected_at").unwrap(),
            Some(1700000000)
        );

        // Overwrite replaces.
        store.sync_state_set("last_connected_at", "1700000100").unwrap();
        assert_eq!(
            store.sync_state_ts("last_connected_at").unwrap(),
            Some(1700000100)
        );
    }

    #[test]
    fn non_numeric_value_is_not_a_timestamp() {
        let (_dir, store) = test_store();
        store.sync_state_set("k", "not-a-number").unwrap();
        assert_eq!(store.sync_state_ts("k").unwrap(), None);
    }
}
