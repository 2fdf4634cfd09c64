//! The engine boundary.

use async_trait::async_trait;

use herald_shared::{Jid, MediaRef, WaMessage};

use crate::error::Result;

/// Raw id used for synthetic "now" anchors when a chat has no stored
/// messages. The primary device treats it as "no specific message".
pub const NOW_ANCHOR_ID: &str = "FFFFFFFFFFFFFFFFFFFFFFFF";

/// Acknowledgement for an accepted outbound message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Raw protocol id assigned to the message.
    pub id: String,
    /// Server timestamp, Unix seconds.
    pub timestamp: i64,
}

/// A contact as known to the engine's own cache.
#[derive(Debug, Clone, Default)]
pub struct CachedContact {
    pub full_name: String,
    pub first_name: String,
    pub business_name: String,
    pub push_name: String,
}

#[derive(Debug, Clone)]
pub struct GroupParticipant {
    pub jid: Jid,
    /// The participant's hidden-number alias, when the group uses lids.
    pub lid: Option<Jid>,
}

#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub jid: Jid,
    pub name: String,
    pub participants: Vec<GroupParticipant>,
}

/// Reference point for an on-demand history request: history is paged
/// backwards from this message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryAnchor {
    pub chat: Jid,
    pub raw_id: String,
    pub from_me: bool,
    pub timestamp: i64,
}

impl HistoryAnchor {
    /// A synthetic anchor at the current time, for chats with no stored
    /// messages or when the latest messages are wanted.
    pub fn now(chat: Jid) -> Self {
        Self {
            chat,
            raw_id: NOW_ANCHOR_ID.to_string(),
            from_me: true,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// The multi-device protocol engine as seen by the daemon.
///
/// Implementations run the socket and all cryptography on their own tasks and
/// deliver [`crate::WaEvent`]s through the channel handed out at construction
/// time. All methods must be cheap to call concurrently.
#[async_trait]
pub trait WaTransport: Send + Sync {
    /// The paired device identity, if this install has completed pairing.
    fn paired_jid(&self) -> Option<Jid>;

    /// Establish (or re-establish) the connection. For unpaired devices this
    /// starts the QR pairing flow, reported through pairing events.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self);

    /// Announce available presence so the primary device delivers pending
    /// offline messages and answers sync requests.
    async fn send_presence_available(&self) -> Result<()>;

    async fn send_message(&self, chat: &Jid, message: &WaMessage) -> Result<SendReceipt>;

    /// Upload media bytes to the blob service, returning the handle to embed
    /// in an outgoing media message.
    async fn upload_image(&self, data: &[u8], mime: &str) -> Result<MediaRef>;

    /// Fetch and decrypt the media blob referenced by a stored message.
    async fn download_media(&self, message: &WaMessage) -> Result<Vec<u8>>;

    /// Send a read receipt for the given raw message ids.
    async fn mark_read(&self, chat: &Jid, raw_ids: &[String]) -> Result<()>;

    /// Whether a phone number is registered on the network.
    async fn is_on_network(&self, number: &str) -> Result<Option<Jid>>;

    /// The engine's cached contact record for a JID, if any.
    async fn cached_contact(&self, jid: &Jid) -> Option<CachedContact>;

    async fn all_cached_contacts(&self) -> Vec<(Jid, CachedContact)>;

    async fn group_info(&self, jid: &Jid) -> Result<GroupInfo>;

    /// Ask the primary device for `count` messages preceding `anchor`.
    /// Fire-and-forget: the phone is free to ignore the request, and any
    /// result arrives later as an ordinary history-sync event.
    async fn request_history(&self, anchor: &HistoryAnchor, count: u32) -> Result<()>;
}
