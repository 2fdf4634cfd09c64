//! Connection lifecycle and the event pump.
//!
//! The engine drives events on its own tasks; [`Session`] pumps them into
//! durable state transitions. Connection status and the current QR code live
//! in one small record behind a `RwLock` (readers are the HTTP status
//! endpoints, writers the pump and the reconnect path). Reconnects collapse
//! through a try-lock so concurrent triggers cause a single attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use herald_proto::{
    HistoryConversation, MessageEvent, ReceiptKind, WaEvent, WaTransport,
};
use herald_shared::jid::{extract_number, format_message_id, parse_api, to_api_string};
use herald_shared::{ConnectionStatus, Jid, Server, StatusResponse};
use herald_store::Store;

use crate::error::Result;
use crate::history::HistoryController;
use crate::names::{known_name, resolve_sender_name};

const KEY_LAST_CONNECTED: &str = "last_connected_at";
const KEY_LAST_DISCONNECTED: &str = "last_disconnected_at";

/// Chat previews are capped so a pasted essay does not bloat the chat list.
const PREVIEW_CHARS: usize = 100;

/// Chats refreshed after an offline-sync-completed notice.
const RECENT_SYNC_CHATS: usize = 5;
const RECENT_SYNC_COUNT: u32 = 50;

/// Cap on (sender, chat) pairs per sender-name backfill run.
const BACKFILL_LIMIT: i64 = 100;

/// Delays and deadlines of the lifecycle paths. Tests shrink these.
#[derive(Debug, Clone)]
pub struct SessionTimings {
    pub reconnect_delay: Duration,
    /// Stabilisation delay before the post-offline recent sync.
    pub recent_sync_delay: Duration,
    /// Spacing between consecutive recent-sync requests.
    pub recent_sync_spacing: Duration,
    /// Overall deadline for one recent-sync pass.
    pub recent_sync_deadline: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            recent_sync_delay: Duration::from_secs(2),
            recent_sync_spacing: Duration::from_millis(200),
            recent_sync_deadline: Duration::from_secs(30),
        }
    }
}

struct Shared {
    status: ConnectionStatus,
    qr_code: Option<String>,
}

pub struct Session {
    transport: Arc<dyn WaTransport>,
    store: Arc<Store>,
    history: Arc<HistoryController>,
    shared: RwLock<Shared>,
    /// One-slot queue: a second reconnect trigger while one is in flight is a
    /// silent no-op, never a queued second attempt.
    reconnecting: tokio::sync::Mutex<()>,
    /// The event receiver is taken exactly once; repeated `connect()` calls
    /// after a reconnect therefore never spawn a duplicate pump.
    pump_rx: StdMutex<Option<mpsc::UnboundedReceiver<WaEvent>>>,
    timings: SessionTimings,
    /// Self-handle for spawning pump and hydration tasks.
    weak: Weak<Session>,
}

impl Session {
    pub fn new(
        transport: Arc<dyn WaTransport>,
        events: mpsc::UnboundedReceiver<WaEvent>,
        store: Arc<Store>,
        history: Arc<HistoryController>,
    ) -> Arc<Self> {
        Self::with_timings(transport, events, store, history, SessionTimings::default())
    }

    pub fn with_timings(
        transport: Arc<dyn WaTransport>,
        events: mpsc::UnboundedReceiver<WaEvent>,
        store: Arc<Store>,
        history: Arc<HistoryController>,
        timings: SessionTimings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            transport,
            store,
            history,
            shared: RwLock::new(Shared {
                status: ConnectionStatus::Disconnected,
                qr_code: None,
            }),
            reconnecting: tokio::sync::Mutex::new(()),
            pump_rx: StdMutex::new(Some(events)),
            timings,
            weak: weak.clone(),
        })
    }

    /// A strong self-handle for spawned tasks. None only during teardown.
    fn handle(&self) -> Option<Arc<Self>> {
        self.weak.upgrade()
    }

    /// Start (or restart) the connection. The first call also spawns the
    /// event pump.
    pub async fn connect(&self) -> Result<()> {
        let rx = self
            .pump_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(rx), Some(session)) = (rx, self.handle()) {
            tokio::spawn(async move { session.pump(rx).await });
        }

        if self.transport.paired_jid().is_none() {
            info!("no paired device, starting QR pairing flow");
        } else {
            self.set_status(ConnectionStatus::Connecting);
        }
        self.transport.connect().await?;
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        self.set_status(ConnectionStatus::Disconnected);
    }

    // --- shared-state accessors -------------------------------------------

    pub fn current_status(&self) -> ConnectionStatus {
        self.shared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    pub fn is_ready(&self) -> bool {
        self.current_status() == ConnectionStatus::Ready
    }

    pub fn qr_code(&self) -> Option<String> {
        self.shared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .qr_code
            .clone()
    }

    /// Connection status plus the persisted offline-gap accounting.
    pub fn status(&self) -> StatusResponse {
        let status = self.current_status();
        let last_connected_at = self.store.sync_state_ts(KEY_LAST_CONNECTED).ok().flatten();
        let last_disconnected_at = self
            .store
            .sync_state_ts(KEY_LAST_DISCONNECTED)
            .ok()
            .flatten();
        let offline_gap_secs = match (last_connected_at, last_disconnected_at) {
            (Some(connected), Some(disconnected)) if connected > disconnected => {
                Some(connected - disconnected)
            }
            _ => None,
        };

        StatusResponse {
            status,
            ready: status == ConnectionStatus::Ready,
            last_connected_at,
            last_disconnected_at,
            offline_gap_secs,
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.shared
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .status = status;
    }

    fn set_qr(&self, qr_code: Option<String>, status: Option<ConnectionStatus>) {
        let mut shared = self.shared.write().unwrap_or_else(PoisonError::into_inner);
        shared.qr_code = qr_code;
        if let Some(status) = status {
            shared.status = status;
        }
    }

    // --- event pump --------------------------------------------------------

    async fn pump(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<WaEvent>) {
        info!("event pump started");
        while let Some(event) = rx.recv().await {
            // A dropped event is recoverable on the next history sync; the
            // pump itself must survive anything a handler throws.
            if let Err(e) = self.dispatch(event).await {
                warn!(error = %e, "event handler failed, continuing");
            }
        }
        info!("event pump ended");
    }

    async fn dispatch(&self, event: WaEvent) -> Result<()> {
        match event {
            WaEvent::Connected => self.handle_connected().await?,

            WaEvent::Disconnected => {
                self.set_status(ConnectionStatus::Disconnected);
                self.record_now(KEY_LAST_DISCONNECTED)?;
                info!("disconnected, scheduling reconnect");
                self.spawn_reconnect();
            }

            WaEvent::StreamReplaced => {
                self.set_status(ConnectionStatus::Disconnected);
                self.record_now(KEY_LAST_DISCONNECTED)?;
                info!("stream replaced, scheduling reconnect");
                self.spawn_reconnect();
            }

            WaEvent::PairingCode(code) => {
                info!("QR code received, scan to authenticate");
                self.set_qr(Some(code), Some(ConnectionStatus::Qr));
            }

            WaEvent::PairingSuccess => {
                info!("QR authentication successful");
                self.set_qr(None, Some(ConnectionStatus::Authenticated));
            }

            WaEvent::PairingTimeout => {
                info!("QR code timed out, attempting reconnect");
                self.set_qr(None, None);
                self.spawn_reconnect();
            }

            WaEvent::Message(evt) => self.handle_message(evt).await?,

            WaEvent::HistorySync(conversations) => {
                self.handle_history_sync(conversations).await?
            }

            WaEvent::PushName { jid, name } => {
                debug!(jid = %jid, name = %name, "push name updated");
                self.store.update_push_name(&jid.to_string(), &name)?;
            }

            WaEvent::Receipt { chat, kind } => {
                // A read-self receipt means the user read the chat on their
                // phone; mirror it locally.
                if kind == ReceiptKind::ReadSelf {
                    self.store.mark_read(&chat.to_string())?;
                }
            }

            WaEvent::OfflineSyncPreview { total, messages } => {
                info!(total, messages, "offline sync preview");
            }

            WaEvent::OfflineSyncCompleted => {
                info!("offline sync completed, requesting recent messages for active chats");
                if let Some(session) = self.handle() {
                    tokio::spawn(async move { session.sync_recent_chats().await });
                }
            }
        }
        Ok(())
    }

    async fn handle_connected(&self) -> Result<()> {
        self.set_status(ConnectionStatus::Ready);
        info!("connected and ready");

        let now = chrono::Utc::now().timestamp();
        if let Some(disconnected_at) = self.store.sync_state_ts(KEY_LAST_DISCONNECTED)? {
            let gap = now - disconnected_at;
            if gap > 0 {
                info!(
                    gap_secs = gap,
                    "offline gap since last disconnect (messages in this window may be missing)"
                );
            }
        }
        self.store.sync_state_set(KEY_LAST_CONNECTED, &now.to_string())?;

        // Available presence makes the primary device deliver pending
        // offline messages and answer on-demand sync requests.
        if let Err(e) = self.transport.send_presence_available().await {
            warn!(error = %e, "failed to announce presence");
        }

        // History sync will restore the authoritative counts.
        self.store.reset_all_unread()?;

        if let Some(session) = self.handle() {
            tokio::spawn(async move { session.hydrate_contacts().await });
        }
        if let Some(session) = self.handle() {
            tokio::spawn(async move { session.hydrate_group_names().await });
        }
        if let Some(session) = self.handle() {
            tokio::spawn(async move { session.backfill_sender_names().await });
        }

        Ok(())
    }

    fn record_now(&self, key: &str) -> Result<()> {
        self.store
            .sync_state_set(key, &chrono::Utc::now().timestamp().to_string())?;
        Ok(())
    }

    // --- reconnect ---------------------------------------------------------

    fn spawn_reconnect(&self) {
        if let Some(session) = self.handle() {
            tokio::spawn(async move { session.reconnect().await });
        }
    }

    async fn reconnect(self: Arc<Self>) {
        let Ok(_guard) = self.reconnecting.try_lock() else {
            debug!("reconnect already in progress, skipping");
            return;
        };

        self.transport.disconnect().await;
        self.set_status(ConnectionStatus::Disconnected);
        info!(delay = ?self.timings.reconnect_delay, "reconnecting after delay");
        tokio::time::sleep(self.timings.reconnect_delay).await;

        if let Err(e) = self.connect().await {
            warn!(error = %e, "reconnect failed");
        }
    }

    // --- message pipeline --------------------------------------------------

    /// Sender resolution: the surfaced participant wins, then the own device
    /// for self-sends, then the chat itself for direct chats.
    fn determine_sender(&self, evt: &MessageEvent) -> Option<Jid> {
        if let Some(participant) = &evt.participant {
            return Some(participant.clone());
        }
        if evt.from_me {
            return self.transport.paired_jid();
        }
        if !evt.chat.is_group() {
            return Some(evt.chat.clone());
        }
        None
    }

    /// Steps shared between live messages and history items: resolve the
    /// sender, decode content, and upsert the message row.
    async fn persist_message(&self, evt: &MessageEvent) -> Result<StoredMessage> {
        let chat_jid = evt.chat.to_string();

        let sender = self.determine_sender(evt);
        let sender_name = match &sender {
            Some(jid) => {
                resolve_sender_name(&self.transport, &self.store, jid, &evt.push_name, &evt.chat)
                    .await
            }
            None => evt.push_name.clone(),
        };

        let body = evt.message.body().to_string();
        let media_kind = evt.message.media_kind();
        let raw = if media_kind.is_some() {
            match evt.message.to_bytes() {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(raw_id = %evt.raw_id, error = %e, "failed to encode message payload");
                    None
                }
            }
        } else {
            None
        };

        let id = format_message_id(evt.from_me, &to_api_string(&chat_jid), &evt.raw_id);
        self.store.upsert_message(
            &id,
            &chat_jid,
            &sender.map(|j| j.to_string()).unwrap_or_default(),
            &sender_name,
            evt.from_me,
            &body,
            evt.timestamp,
            media_kind.is_some(),
            media_kind.map(|k| k.as_str()),
            raw.as_deref(),
        )?;

        Ok(StoredMessage { id, body })
    }

    async fn handle_message(&self, evt: MessageEvent) -> Result<()> {
        let chat_jid = evt.chat.to_string();
        let is_group = evt.chat.is_group();
        let from_me = evt.from_me;
        let timestamp = evt.timestamp;

        let stored = self.persist_message(&evt).await?;

        let preview = truncate_preview(&stored.body);
        self.store
            .upsert_chat(&chat_jid, "", is_group, Some(&preview), Some(timestamp))?;
        if !stored.body.is_empty() {
            self.store
                .update_chat_last_message(&chat_jid, &preview, timestamp)?;
        }

        if !from_me {
            self.store.increment_unread(&chat_jid)?;
        }

        debug!(id = %stored.id, chat = %chat_jid, "stored message");
        Ok(())
    }

    async fn handle_history_sync(&self, conversations: Vec<HistoryConversation>) -> Result<()> {
        info!(conversations = conversations.len(), "history sync received");

        for conv in conversations {
            let chat_jid = conv.chat.to_string();
            let is_group = conv.chat.is_group();

            // Track the newest message for the chat summary; the body only
            // replaces the tracked one when non-empty.
            let mut last_ts: Option<i64> = None;
            let mut last_body: Option<String> = None;

            for evt in &conv.messages {
                if let Err(e) = self.persist_message(evt).await {
                    warn!(chat = %chat_jid, error = %e, "failed to store history message");
                    continue;
                }

                if last_ts.map_or(true, |ts| evt.timestamp > ts) {
                    let body = evt.message.body();
                    if !body.is_empty() {
                        last_body = Some(truncate_preview(body));
                    }
                    last_ts = Some(evt.timestamp);
                }
            }

            self.store.upsert_chat(
                &chat_jid,
                &conv.name,
                is_group,
                last_body.as_deref(),
                last_ts,
            )?;

            // The conversation carries the canonical unread count; it
            // replaces whatever real-time increments happened meanwhile.
            self.store.set_unread(&chat_jid, conv.unread_count)?;

            if !is_group {
                let number = extract_number(&chat_jid).to_string();
                self.store
                    .upsert_contact(&chat_jid, &conv.name, "", &number, false)?;
            }
        }
        Ok(())
    }

    // --- post-connect hydration --------------------------------------------

    /// Mirror the engine's contact cache into the contacts table.
    async fn hydrate_contacts(self: Arc<Self>) {
        let contacts = self.transport.all_cached_contacts().await;
        let mut count = 0usize;
        for (jid, info) in contacts {
            if jid.server != Server::User {
                continue;
            }
            let name = [&info.full_name, &info.first_name, &info.business_name]
                .into_iter()
                .find(|n| !n.is_empty())
                .cloned()
                .unwrap_or_default();
            if let Err(e) = self.store.upsert_contact(
                &jid.to_string(),
                &name,
                &info.push_name,
                &jid.user,
                false,
            ) {
                warn!(jid = %jid, error = %e, "failed to hydrate contact");
                continue;
            }
            count += 1;
        }
        info!(count, "hydrated contacts from engine cache");
    }

    /// Fetch real names for group chats that only exist as bare JIDs.
    async fn hydrate_group_names(self: Arc<Self>) {
        let jids = match self.store.unnamed_group_chats() {
            Ok(jids) => jids,
            Err(e) => {
                warn!(error = %e, "failed to query unnamed groups");
                return;
            }
        };

        let mut count = 0usize;
        for jid_str in jids {
            let Ok(jid) = Jid::parse(&jid_str) else {
                continue;
            };
            let Ok(info) = self.transport.group_info(&jid).await else {
                continue;
            };
            if info.name.is_empty() {
                continue;
            }
            if let Err(e) = self.store.set_chat_name(&jid_str, &info.name) {
                warn!(chat = %jid_str, error = %e, "failed to store group name");
                continue;
            }
            count += 1;
        }
        if count > 0 {
            info!(count, "hydrated group names");
        }
    }

    /// Resolve lid senders with empty names in group messages. Runs once per
    /// connect; rosters are fetched once per chat within the batch and names
    /// are written only to rows that are still empty.
    async fn backfill_sender_names(self: Arc<Self>) {
        let pairs = match self.store.lid_senders_missing_name(BACKFILL_LIMIT) {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!(error = %e, "sender-name backfill query failed");
                return;
            }
        };
        if pairs.is_empty() {
            return;
        }

        // chat jid -> lid jid string -> resolved name
        let mut rosters: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut updated = 0usize;

        for (lid, chat) in pairs {
            if !rosters.contains_key(&chat) {
                rosters.insert(chat.clone(), self.resolve_roster(&chat).await);
            }

            let Some(name) = rosters.get(&chat).and_then(|m| m.get(&lid)) else {
                continue;
            };
            match self.store.fill_sender_name(&lid, &chat, name) {
                Ok(n) => updated += n,
                Err(e) => warn!(sender = %lid, chat = %chat, error = %e, "failed to fill sender name"),
            }
        }

        if updated > 0 {
            info!(updated, groups = rosters.len(), "backfilled group sender names");
        }
    }

    /// lid -> display name for one group, empty on any failure.
    async fn resolve_roster(&self, chat: &str) -> HashMap<String, String> {
        let mut names = HashMap::new();
        let Ok(chat_jid) = Jid::parse(chat) else {
            return names;
        };
        let Ok(info) = self.transport.group_info(&chat_jid).await else {
            return names;
        };

        for participant in info.participants {
            let Some(lid) = participant.lid else {
                continue;
            };
            let name = known_name(&self.transport, &self.store, &participant.jid)
                .await
                .unwrap_or_else(|| participant.jid.user.clone());
            names.insert(lid.to_string(), name);
        }
        names
    }

    /// Post-offline catch-up: ask for the latest messages of the most recent
    /// chats. Best-effort, the phone often ignores these.
    async fn sync_recent_chats(self: Arc<Self>) {
        tokio::time::sleep(self.timings.recent_sync_delay).await;

        let chats = match self.store.get_chats() {
            Ok(chats) => chats,
            Err(e) => {
                warn!(error = %e, "recent sync: failed to list chats");
                return;
            }
        };

        let targets: Vec<Jid> = chats
            .iter()
            .take(RECENT_SYNC_CHATS)
            .filter_map(|c| parse_api(&c.id).ok())
            .collect();

        let history = Arc::clone(&self.history);
        let spacing = self.timings.recent_sync_spacing;
        let pass = async move {
            let mut synced = 0usize;
            for jid in targets {
                match history.request_recent(&jid, RECENT_SYNC_COUNT).await {
                    Ok(()) => synced += 1,
                    Err(e) => warn!(chat = %jid, error = %e, "recent sync request failed"),
                }
                tokio::time::sleep(spacing).await;
            }
            synced
        };

        match tokio::time::timeout(self.timings.recent_sync_deadline, pass).await {
            Ok(synced) => info!(synced, "requested recent messages for active chats"),
            Err(_) => warn!("recent sync pass hit its deadline"),
        }
    }
}

struct StoredMessage {
    id: String,
    body: String,
}

/// At most `PREVIEW_CHARS` characters, with a `...` marker when truncated.
fn truncate_preview(s: &str) -> String {
    if s.chars().count() <= PREVIEW_CHARS {
        return s.to_string();
    }
    let mut preview: String = s.chars().take(PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}
