//! JID handling.
//!
//! WhatsApp addresses cross two wire formats: the protocol side speaks
//! `user@s.whatsapp.net`, the launcher API speaks `user@c.us` (the
//! whatsapp-web.js convention). Group, lid, and broadcast addresses are
//! identical on both sides. Addresses stay structured ([`Jid`]) inside the
//! daemon and are stringified only at the store boundary and in API responses.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Internal wire suffix for individual users.
pub const SERVER_USER: &str = "s.whatsapp.net";
/// API wire suffix for individual users.
pub const SERVER_USER_API: &str = "c.us";
/// Wire suffix for group chats.
pub const SERVER_GROUP: &str = "g.us";
/// Wire suffix for lid (hidden-number) addresses.
pub const SERVER_LID: &str = "lid";
/// Wire suffix for broadcast lists.
pub const SERVER_BROADCAST: &str = "broadcast";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum JidError {
    #[error("JID has no @server part: {0}")]
    MissingServer(String),

    #[error("unknown JID server: {0}")]
    UnknownServer(String),

    #[error("invalid message id: {0}")]
    InvalidMessageId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Server {
    User,
    Group,
    Lid,
    Broadcast,
}

impl Server {
    pub fn as_str(&self) -> &'static str {
        match self {
            Server::User => SERVER_USER,
            Server::Group => SERVER_GROUP,
            Server::Lid => SERVER_LID,
            Server::Broadcast => SERVER_BROADCAST,
        }
    }

    fn parse(s: &str) -> Result<Self, JidError> {
        match s {
            SERVER_USER => Ok(Server::User),
            SERVER_GROUP => Ok(Server::Group),
            SERVER_LID => Ok(Server::Lid),
            SERVER_BROADCAST => Ok(Server::Broadcast),
            other => Err(JidError::UnknownServer(other.to_string())),
        }
    }
}

/// A structured WhatsApp address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: Server,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: Server) -> Self {
        Self {
            user: user.into(),
            server,
        }
    }

    /// Parse an internal-form JID string (`user@s.whatsapp.net`, `x@g.us`, ...).
    pub fn parse(s: &str) -> Result<Self, JidError> {
        let (user, server) = s
            .split_once('@')
            .ok_or_else(|| JidError::MissingServer(s.to_string()))?;
        Ok(Self {
            user: user.to_string(),
            server: Server::parse(server)?,
        })
    }

    pub fn is_group(&self) -> bool {
        self.server == Server::Group
    }

    pub fn is_lid(&self) -> bool {
        self.server == Server::Lid
    }

    /// The API form consumed by the front-end.
    pub fn to_api(&self) -> String {
        match self.server {
            Server::User => format!("{}@{}", self.user, SERVER_USER_API),
            _ => self.to_string(),
        }
    }
}

impl std::fmt::Display for Jid {
    /// Internal form, the canonical representation inside the store.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.server.as_str())
    }
}

/// Convert a JID string to API form.
pub fn to_api_string(jid: &str) -> String {
    match jid.strip_suffix("@s.whatsapp.net") {
        Some(user) => format!("{user}@c.us"),
        None => jid.to_string(),
    }
}

/// Convert an API-form JID string back to internal form.
pub fn to_internal_string(jid: &str) -> String {
    match jid.strip_suffix("@c.us") {
        Some(user) => format!("{user}@s.whatsapp.net"),
        None => jid.to_string(),
    }
}

/// Parse an API-form JID string into a structured [`Jid`].
pub fn parse_api(id: &str) -> Result<Jid, JidError> {
    Jid::parse(&to_internal_string(id))
}

/// The phone number part of a JID string: everything before the `@`, or the
/// whole string when there is none.
pub fn extract_number(jid: &str) -> &str {
    match jid.find('@') {
        Some(at) => &jid[..at],
        None => jid,
    }
}

/// A parsed message identifier: `"<fromMe>_<chatJid>_<rawId>"` with the chat
/// in API form. The format is shared with whatsapp-web.js clients, so the
/// front-end can treat ids as opaque and hand them back for replies,
/// reactions, downloads, and read receipts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKey {
    pub from_me: bool,
    pub chat: String,
    pub raw_id: String,
}

/// Domain boundaries used to split the chat JID from the raw id.
const KEY_DOMAINS: [&str; 3] = ["@c.us_", "@g.us_", "@s.whatsapp.net_"];

impl MessageKey {
    pub fn new(from_me: bool, chat: impl Into<String>, raw_id: impl Into<String>) -> Self {
        Self {
            from_me,
            chat: chat.into(),
            raw_id: raw_id.into(),
        }
    }

    /// Parse a formatted message id back into its components.
    pub fn parse(id: &str) -> Result<Self, JidError> {
        let invalid = || JidError::InvalidMessageId(id.to_string());

        let first = id.find('_').ok_or_else(invalid)?;
        let from_me = &id[..first] == "true";
        let rest = &id[first + 1..];

        for domain in KEY_DOMAINS {
            if let Some(idx) = rest.find(domain) {
                // Trailing underscore of the marker belongs to the separator.
                let chat = &rest[..idx + domain.len() - 1];
                let raw_id = &rest[idx + domain.len()..];
                if chat.is_empty() || raw_id.is_empty() {
                    return Err(invalid());
                }
                return Ok(Self {
                    from_me,
                    chat: chat.to_string(),
                    raw_id: raw_id.to_string(),
                });
            }
        }

        Err(invalid())
    }

    /// Serialise into the wire format. Lossless: `parse(format(k)) == k`.
    pub fn format(&self) -> String {
        format!(
            "{}_{}_{}",
            if self.from_me { "true" } else { "false" },
            self.chat,
            self.raw_id
        )
    }
}

/// Build a formatted message id without going through a [`MessageKey`].
pub fn format_message_id(from_me: bool, chat_jid: &str, raw_id: &str) -> String {
    MessageKey::new(from_me, chat_jid, raw_id).format()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jid_to_api_forms() {
        let user = Jid::new("10000000001", Server::User);
        assert_eq!(user.to_api(), "10000000001@c.us");

        let group = Jid::new("120363000000000001", Server::Group);
        assert_eq!(group.to_api(), "120363000000000001@g.us");

        let lid = Jid::new("987654", Server::Lid);
        assert_eq!(lid.to_api(), "987654@lid");
    }

    #[test]
    fn api_string_conversion_round_trip() {
        assert_eq!(
            to_api_string("10000000001@s.whatsapp.net"),
            "10000000001@c.us"
        );
        assert_eq!(
            to_internal_string("10000000001@c.us"),
            "10000000001@s.whatsapp.net"
        );
        // Pass-through forms.
        assert_eq!(to_api_string("1@g.us"), "1@g.us");
        assert_eq!(to_internal_string("1@g.us"), "1@g.us");
        assert_eq!(to_api_string("1@lid"), "1@lid");

        for original in ["10000000001@s.whatsapp.net", "12036300@g.us"] {
            assert_eq!(to_internal_string(&to_api_string(original)), original);
        }
    }

    #[test]
    fn parse_api_maps_to_internal_server() {
        let jid = parse_api("10000000001@c.us").unwrap();
        assert_eq!(jid, Jid::new("10000000001", Server::User));
        assert_eq!(jid.to_string(), "10000000001@s.whatsapp.net");

        let group = parse_api("120363000000000001@g.us").unwrap();
        assert!(group.is_group());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Jid::parse("no-at-sign").is_err());
        assert!(Jid::parse("user@unknown.example").is_err());
    }

    #[test]
    fn extract_number_variants() {
        assert_eq!(extract_number("10000000001@c.us"), "10000000001");
        assert_eq!(extract_number("10000000001@s.whatsapp.net"), "10000000001");
        assert_eq!(extract_number("10000000001"), "10000000001");
    }

    #[test]
    fn message_key_round_trip() {
        let cases = [
            (true, "10000000001@c.us", "3EB0ABCDEF"),
            (false, "120363000000000001@g.us", "AAA111"),
            (false, "10000000001@s.whatsapp.net", "X_Y_Z"),
        ];
        for (from_me, chat, raw_id) in cases {
            let formatted = format_message_id(from_me, chat, raw_id);
            let parsed = MessageKey::parse(&formatted).unwrap();
            assert_eq!(parsed, MessageKey::new(from_me, chat, raw_id));
            assert_eq!(parsed.format(), formatted);
        }
    }

    #[test]
    fn message_key_raw_id_may_contain_underscores() {
        let parsed = MessageKey::parse("true_10000000001@c.us_AB_CD_EF").unwrap();
        assert_eq!(parsed.chat, "10000000001@c.us");
        assert_eq!(parsed.raw_id, "AB_CD_EF");
    }

    #[test]
    fn message_key_parse_rejects_malformed() {
        for bad in [
            "no-underscore",
            "true_",
            "true_missing-domain_ID",
            "true_10000000001@c.us_",
        ] {
            assert!(MessageKey::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn message_key_from_me_defaults_false() {
        let parsed = MessageKey::parse("banana_10000000001@c.us_ID").unwrap();
        assert!(!parsed.from_me);
    }
}
