//! API data types.
//!
//! Field names must match the launcher front-end's TypeScript client, hence
//! the camelCase renames. JIDs in these types are always API form (I1).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub number: String,
    pub is_group: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub name: String,
    pub is_group: bool,
    pub unread_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_timestamp: Option<i64>,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub body: String,
    pub from_me: bool,
    pub timestamp: i64,
    /// Sender JID, API form.
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub has_media: bool,
    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(flatten)]
    pub message: Message,
    pub chat_name: String,
    pub chat_jid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Qr,
    Authenticated,
    Ready,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Qr => "qr",
            ConnectionStatus::Authenticated => "authenticated",
            ConnectionStatus::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: ConnectionStatus,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_disconnected_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_gap_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serialises_with_frontend_field_names() {
        let msg = Message {
            id: "true_10000000001@c.us_AAA".to_string(),
            body: "hi".to_string(),
            from_me: true,
            timestamp: 1700000000,
            from: "10000000001@c.us".to_string(),
            sender_name: None,
            has_media: true,
            media_kind: Some("image".to_string()),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["fromMe"], true);
        assert_eq!(json["hasMedia"], true);
        assert_eq!(json["mediaType"], "image");
        assert!(json.get("senderName").is_none());
    }

    #[test]
    fn status_serialises_lowercase() {
        let json = serde_json::to_value(ConnectionStatus::Ready).unwrap();
        assert_eq!(json, "ready");
    }
}
