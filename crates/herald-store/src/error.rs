use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found")]
    NotFound,

    #[error("Full-text search is not available in this build")]
    SearchUnavailable,

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Corrupt message id in store: {0}")]
    CorruptMessageId(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
