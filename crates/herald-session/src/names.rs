//! Sender display-name resolution.
//!
//! Four data sources know something about a sender: the engine's contact
//! cache, the local contacts table, the group roster (for lid senders), and
//! the push name carried by the event itself. Each probe is its own fallible
//! lookup; [`resolve_sender_name`] composes them first-non-empty-wins.

use std::sync::Arc;

use herald_proto::{CachedContact, WaTransport};
use herald_shared::Jid;
use herald_store::Store;

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// Best name in the engine's own contact cache.
fn cache_name(contact: &CachedContact) -> Option<String> {
    non_empty(contact.full_name.clone())
        .or_else(|| non_empty(contact.first_name.clone()))
        .or_else(|| non_empty(contact.business_name.clone()))
        .or_else(|| non_empty(contact.push_name.clone()))
}

async fn engine_cache_lookup(transport: &Arc<dyn WaTransport>, jid: &Jid) -> Option<String> {
    let contact = transport.cached_contact(jid).await?;
    cache_name(&contact)
}

fn local_contact_lookup(store: &Store, jid: &Jid) -> Option<String> {
    store
        .get_contact_name(&jid.to_string())
        .ok()
        .and_then(non_empty)
}

/// For lid senders in groups: find the roster entry whose lid or canonical
/// JID matches, restart the lookup on the canonical JID, and fall back to the
/// participant's number.
async fn group_roster_lookup(
    transport: &Arc<dyn WaTransport>,
    store: &Store,
    sender: &Jid,
    chat: &Jid,
) -> Option<String> {
    if !sender.is_lid() || !chat.is_group() {
        return None;
    }

    let info = match transport.group_info(chat).await {
        Ok(info) => info,
        Err(e) => {
            tracing::debug!(group = %chat, error = %e, "group roster lookup failed");
            return None;
        }
    };

    let participant = info
        .participants
        .iter()
        .find(|p| p.lid.as_ref() == Some(sender) || &p.jid == sender)?;

    if let Some(name) = engine_cache_lookup(transport, &participant.jid).await {
        return Some(name);
    }
    if let Some(name) = local_contact_lookup(store, &participant.jid) {
        return Some(name);
    }
    non_empty(participant.jid.user.clone())
}

/// A name either side already knows for a JID: engine cache first, then the
/// local contacts table. Used by the sender-name backfill, which has its own
/// final fallback (the participant's number).
pub(crate) async fn known_name(
    transport: &Arc<dyn WaTransport>,
    store: &Store,
    jid: &Jid,
) -> Option<String> {
    if let Some(name) = engine_cache_lookup(transport, jid).await {
        return Some(name);
    }
    local_contact_lookup(store, jid)
}

/// Resolve a display name for `sender` inside `chat`, falling back to the
/// event's push name (which may itself be empty).
pub async fn resolve_sender_name(
    transport: &Arc<dyn WaTransport>,
    store: &Store,
    sender: &Jid,
    push_name: &str,
    chat: &Jid,
) -> String {
    if let Some(name) = engine_cache_lookup(transport, sender).await {
        return name;
    }
    if let Some(name) = local_contact_lookup(store, sender) {
        return name;
    }
    if let Some(name) = group_roster_lookup(transport, store, sender, chat).await {
        return name;
    }
    push_name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_name_prefers_full_name() {
        let contact = CachedContact {
            full_name: "Alice Smith".to_string(),
            first_name: "Alice".to_string(),
            business_name: String::new(),
            push_name: "Ali".to_string(),
        };
        assert_eq!(cache_name(&contact).as_deref(), Some("Alice Smith"));
    }

    #[test]
    fn cache_name_walks_the_cascade() {
        let contact = CachedContact {
            push_name: "Ali".to_string(),
            ..Default::default()
        };
        assert_eq!(cache_name(&contact).as_deref(), Some("Ali"));

        assert_eq!(cache_name(&CachedContact::default()), None);
    }
}
