//! Events delivered by the protocol engine.

use herald_shared::{Jid, WaMessage};

/// One message observation, live or historical.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub chat: Jid,
    /// The sender as surfaced by the engine. Historical payloads may omit it;
    /// the session manager then infers the sender from `from_me` and `chat`.
    pub participant: Option<Jid>,
    pub from_me: bool,
    /// Raw protocol message id (opaque ASCII).
    pub raw_id: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Push name carried by the event envelope, may be empty.
    pub push_name: String,
    pub message: WaMessage,
}

/// One conversation inside a history-sync batch.
#[derive(Debug, Clone)]
pub struct HistoryConversation {
    pub chat: Jid,
    pub name: String,
    /// Authoritative unread count for the chat.
    pub unread_count: i64,
    pub messages: Vec<MessageEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivered,
    Read,
    /// The user read the chat on another device.
    ReadSelf,
}

/// The engine's event stream, pumped by the session manager.
#[derive(Debug, Clone)]
pub enum WaEvent {
    Connected,
    Disconnected,
    StreamReplaced,
    PairingCode(String),
    PairingSuccess,
    PairingTimeout,
    Message(MessageEvent),
    HistorySync(Vec<HistoryConversation>),
    PushName { jid: Jid, name: String },
    Receipt { chat: Jid, kind: ReceiptKind },
    OfflineSyncPreview { total: u32, messages: u32 },
    OfflineSyncCompleted,
}
