pub mod content;
pub mod jid;
pub mod types;

pub use content::{MediaKind, MediaRef, RawKey, ReplyContext, WaMessage};
pub use jid::{Jid, JidError, MessageKey, Server};
pub use types::*;
