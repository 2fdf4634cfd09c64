//! Session management for the bridge daemon.
//!
//! [`Session`] owns the connection lifecycle and the event pump that turns
//! protocol events into store writes. [`HistoryController`] drives on-demand
//! backfill: single-chat requests anchored on the oldest stored message and
//! the best-effort deep sync across every chat.

pub mod history;
pub mod names;
pub mod session;

mod error;

pub use error::SessionError;
pub use history::{DeepSyncChatResult, DeepSyncProgress, HistoryController, SyncTuning};
pub use session::{Session, SessionTimings};
