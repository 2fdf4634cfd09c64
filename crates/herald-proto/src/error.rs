use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("not connected to the network")]
    NotConnected,

    #[error("request timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("engine session store error: {0}")]
    SessionStore(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
