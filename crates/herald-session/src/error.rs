use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Store error: {0}")]
    Store(#[from] herald_store::StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] herald_proto::TransportError),

    #[error("A deep sync is already running")]
    DeepSyncRunning,

    #[error("History request timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, SessionError>;
