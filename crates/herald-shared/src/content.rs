//! Protocol message content model.
//!
//! The multi-device protocol delivers a polymorphic message payload; Herald
//! models it as the tagged [`WaMessage`] enum and keeps the original payload
//! around as opaque bincode (`to_bytes`) so media can be re-downloaded long
//! after the event that carried it.

use serde::{Deserialize, Serialize};

/// Handle to an uploaded media blob. Everything the engine needs to fetch and
/// decrypt the blob again later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub mime: String,
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

/// Reply context attached to an extended-text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContext {
    /// Raw id of the quoted message.
    pub stanza_id: String,
    /// JID of the quoted message's chat or sender, wire form.
    pub participant: String,
}

/// The protocol-level key a reaction points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Sticker,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Sticker => "sticker",
            MediaKind::Document => "document",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WaMessage {
    Text {
        text: String,
    },
    ExtendedText {
        text: String,
        context: Option<ReplyContext>,
    },
    Image {
        media: MediaRef,
        caption: Option<String>,
    },
    Video {
        media: MediaRef,
        caption: Option<String>,
    },
    Audio {
        media: MediaRef,
        voice: bool,
    },
    Sticker {
        media: MediaRef,
    },
    Document {
        media: MediaRef,
        caption: Option<String>,
    },
    Reaction {
        target: RawKey,
        emoji: String,
    },
    /// Protocol payloads Herald does not interpret (polls, calls, ...).
    Other,
}

impl WaMessage {
    /// The display body: plain text, extended text, or a media caption.
    pub fn body(&self) -> &str {
        match self {
            WaMessage::Text { text } => text,
            WaMessage::ExtendedText { text, .. } => text,
            WaMessage::Image { caption, .. }
            | WaMessage::Video { caption, .. }
            | WaMessage::Document { caption, .. } => caption.as_deref().unwrap_or(""),
            _ => "",
        }
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            WaMessage::Image { .. } => Some(MediaKind::Image),
            WaMessage::Video { .. } => Some(MediaKind::Video),
            WaMessage::Audio { .. } => Some(MediaKind::Audio),
            WaMessage::Sticker { .. } => Some(MediaKind::Sticker),
            WaMessage::Document { .. } => Some(MediaKind::Document),
            _ => None,
        }
    }

    pub fn has_media(&self) -> bool {
        self.media_kind().is_some()
    }

    pub fn media_ref(&self) -> Option<&MediaRef> {
        match self {
            WaMessage::Image { media, .. }
            | WaMessage::Video { media, .. }
            | WaMessage::Audio { media, .. }
            | WaMessage::Sticker { media }
            | WaMessage::Document { media, .. } => Some(media),
            _ => None,
        }
    }

    /// MIME type of the media payload, `application/octet-stream` otherwise.
    pub fn media_mime(&self) -> &str {
        match self.media_ref() {
            Some(media) if !media.mime.is_empty() => &media.mime,
            _ => "application/octet-stream",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
