//! Protocol transport seam.
//!
//! The WhatsApp multi-device engine is an external collaborator: it owns the
//! socket, the pairing handshake, and all cryptography, and it keeps its own
//! session store (`protocol.db`). Herald only depends on the [`WaTransport`]
//! trait and the [`WaEvent`] stream defined here. [`LoopbackEngine`] is the
//! in-process implementation used by the daemon in development and by every
//! integration test.

pub mod events;
pub mod loopback;
pub mod transport;

mod error;

pub use error::TransportError;
pub use events::{HistoryConversation, MessageEvent, ReceiptKind, WaEvent};
pub use loopback::LoopbackEngine;
pub use transport::{
    CachedContact, GroupInfo, GroupParticipant, HistoryAnchor, SendReceipt, WaTransport,
    NOW_ANCHOR_ID,
};
