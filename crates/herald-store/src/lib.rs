pub mod chats;
pub mod contacts;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod search;
pub mod sync_state;

mod error;

pub use database::Store;
pub use error::StoreError;
pub use messages::OldestMessage;

#[cfg(test)]
pub(crate) mod test_util {
    use crate::database::Store;

    /// Open a throwaway store; the TempDir guard keeps the files alive.
    pub fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open_at(&dir.path().join("app.db")).expect("open store");
        (dir, store)
    }
}
