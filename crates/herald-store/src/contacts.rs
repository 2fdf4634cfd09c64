use rusqlite::params;

use herald_shared::jid::{extract_number, to_api_string};
use herald_shared::Contact;

use crate::database::Store;
use crate::error::{Result, StoreError};

impl Store {
    /// Insert a contact or update it on conflict. Textual fields keep their
    /// existing value when the incoming one is empty; `is_group` and
    /// `updated_at` are always overwritten.
    pub fn upsert_contact(
        &self,
        jid: &str,
        name: &str,
        push_name: &str,
        number: &str,
        is_group: bool,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO contacts (jid, name, push_name, number, is_group, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(jid) DO UPDATE SET
                 name       = CASE WHEN excluded.name      != '' THEN excluded.name      ELSE contacts.name      END,
                 push_name  = CASE WHEN excluded.push_name != '' THEN excluded.push_name ELSE contacts.push_name END,
                 number     = CASE WHEN excluded.number    != '' THEN excluded.number    ELSE contacts.number    END,
                 is_group   = excluded.is_group,
                 updated_at = excluded.updated_at",
            params![jid, name, push_name, number, is_group, Self::now_ts()],
        )?;
        Ok(())
    }

    /// Update only the push name. A no-op when `push_name` is empty.
    pub fn update_push_name(&self, jid: &str, push_name: &str) -> Result<()> {
        if push_name.is_empty() {
            return Ok(());
        }
        self.conn().execute(
            "INSERT INTO contacts (jid, push_name, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(jid) DO UPDATE SET
                 push_name  = excluded.push_name,
                 updated_at = excluded.updated_at",
            params![jid, push_name, Self::now_ts()],
        )?;
        Ok(())
    }

    /// All known chats that are neither lid nor broadcast, as contact entries.
    ///
    /// Chats drive the listing (the engine does not always surface a contact
    /// row for every conversation); the optional contact row only improves
    /// the display name. Ordered case-insensitively by that name.
    pub fn get_contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ch.jid,
                 COALESCE(NULLIF(ct.name, ''), NULLIF(ct.push_name, ''), NULLIF(ch.name, ''),
                     REPLACE(REPLACE(REPLACE(ch.jid, '@s.whatsapp.net', ''), '@g.us', ''), '@c.us', '')) AS display_name,
                 COALESCE(NULLIF(ct.number, ''), '') AS number,
                 ch.is_group
             FROM chats ch
             LEFT JOIN contacts ct ON ch.jid = ct.jid
             WHERE ch.jid NOT LIKE '%@lid'
                 AND ch.jid NOT LIKE '%@broadcast'
             ORDER BY display_name COLLATE NOCASE ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let jid: String = row.get(0)?;
            let display_name: String = row.get(1)?;
            let number: String = row.get(2)?;
            let is_group: bool = row.get(3)?;
            Ok((jid, display_name, number, is_group))
        })?;

        let mut contacts = Vec::new();
        for row in rows {
            let (jid, display_name, number, is_group) = row?;
            let number = if number.is_empty() {
                extract_number(&jid).to_string()
            } else {
                number
            };
            contacts.push(Contact {
                id: to_api_string(&jid),
                name: display_name,
                number,
                is_group,
            });
        }
        Ok(contacts)
    }

    /// Best stored display name for a single contact: name, then push name.
    pub fn get_contact_name(&self, jid: &str) -> Result<String> {
        self.conn()
            .query_row(
                "SELECT name, push_name FROM contacts WHERE jid = ?1",
                params![jid],
                |row| {
                    let name: String = row.get(0)?;
                    let push_name: String = row.get(1)?;
                    Ok(if name.is_empty() { push_name } else { name })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::test_store;

    #[test]
    fn upsert_contact_keeps_non_empty_fields() {
        let (_dir, store) = test_store();
        let jid = "10000000001@s.whatsapp.net";

        store
            .upsert_contact(jid, "Alice Smith", "Ali", "10000000001", false)
            .unwrap();
        // Empty incoming values must not clobber the stored ones.
        store.upsert_contact(jid, "", "", "", false).unwrap();

        assert_eq!(store.get_contact_name(jid).unwrap(), "Alice Smith");
    }

    #[test]
    fn upsert_contact_improves_name() {
        let (_dir, store) = test_store();
        let jid = "10000000001@s.whatsapp.net";

        store.upsert_contact(jid, "", "Ali", "", false).unwrap();
        assert_eq!(store.get_contact_name(jid).unwrap(), "Ali");

        store
            .upsert_contact(jid, "Alice Smith", "", "", false)
            .unwrap();
        assert_eq!(store.get_contact_name(jid).unwrap(), "Alice Smith");
    }

    #[test]
    fn update_push_name_ignores_empty() {
        let (_dir, store) = test_store();
        let jid = "10000000002@s.whatsapp.net";

        store.update_push_name(jid, "PushAlice").unwrap();
        assert_eq!(store.get_contact_name(jid).unwrap(), "PushAlice");

        store.update_push_name(jid, "").unwrap();
        assert_eq!(store.get_contact_name(jid).unwrap(), "PushAlice");
    }

    #[test]
    fn get_contact_name_not_found() {
        let (_dir, store) = test_store();
        assert!(store
            .get_contact_name("99999999999@s.whatsapp.net")
            .is_err());
    }

    #[test]
    fn get_contacts_includes_groups_excludes_lid_broadcast() {
        let (_dir, store) = test_store();

        store
            .upsert_chat("10000000001@s.whatsapp.net", "Alice", false, None, None)
            .unwrap();
        store
            .upsert_contact(
                "10000000001@s.whatsapp.net",
                "Alice Smith",
                "",
                "10000000001",
                false,
            )
            .unwrap();
        store
            .upsert_chat("120363000000000001@g.us", "Family Group", true, None, None)
            .unwrap();
        store
            .upsert_chat("987654@lid", "Hidden", false, None, None)
            .unwrap();
        store
            .upsert_chat("status@broadcast", "Status", false, None, None)
            .unwrap();

        let contacts = store.get_contacts().unwrap();
        assert_eq!(contacts.len(), 2);

        let alice = contacts
            .iter()
            .find(|c| c.id == "10000000001@c.us")
            .expect("alice present in API form");
        assert_eq!(alice.name, "Alice Smith");
        assert_eq!(alice.number, "10000000001");
        assert!(!alice.is_group);

        let group = contacts
            .iter()
            .find(|c| c.id == "120363000000000001@g.us")
            .expect("group present");
        assert_eq!(group.name, "Family Group");
        assert!(group.is_group);
    }

    #[test]
    fn get_contacts_falls_back_to_number() {
        let (_dir, store) = test_store();
        store
            .upsert_chat("10000000003@s.whatsapp.net", "", false, None, None)
            .unwrap();

        let contacts = store.get_contacts().unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "10000000003");
        assert_eq!(contacts[0].number, "10000000003");
    }

    #[test]
    fn get_contacts_sorted_case_insensitively() {
        let (_dir, store) = test_store();
        for (jid, name) in [
            ("10000000001@s.whatsapp.net", "charlie"),
            ("10000000002@s.whatsapp.net", "Alice"),
            ("10000000003@s.whatsapp.net", "bob"),
        ] {
            store.upsert_chat(jid, name, false, None, None).unwrap();
        }

        let names: Vec<_> = store
            .get_contacts()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Alice", "bob", "charlie"]);
    }
}
