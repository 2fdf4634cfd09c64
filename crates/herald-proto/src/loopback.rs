//! In-process protocol engine.
//!
//! Implements the full [`WaTransport`] surface without a network: pairing is
//! immediate, sent messages are echoed back through the event stream the way
//! the real server reflects a device's own sends, and every outbound request
//! is recorded so callers can inspect what would have gone over the wire.
//! On-demand history requests are accepted and then ignored, which is also a
//! behaviour the real primary device is allowed to exhibit.
//!
//! The daemon runs against this engine in development; integration tests
//! script it (inbound events, contact caches, group rosters, number lookups).

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use tokio::sync::mpsc;

use herald_shared::{Jid, MediaRef, Server, WaMessage};

use crate::error::{Result, TransportError};
use crate::events::WaEvent;
use crate::transport::{
    CachedContact, GroupInfo, HistoryAnchor, SendReceipt, WaTransport,
};

/// Identity adopted on first pairing unless overridden.
const DEFAULT_PAIR_USER: &str = "15550000000";

/// A message accepted for delivery.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat: Jid,
    pub raw_id: String,
    pub message: WaMessage,
}

/// A recorded on-demand history request.
#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub anchor: HistoryAnchor,
    pub count: u32,
}

struct Inner {
    device_db: Option<Connection>,
    paired: Option<Jid>,
    connected: bool,
    pair_as: Jid,
    auto_pair: bool,
    echo_sent: bool,
    contacts: HashMap<Jid, CachedContact>,
    groups: HashMap<Jid, GroupInfo>,
    numbers: HashMap<String, Jid>,
    blobs: HashMap<String, Vec<u8>>,
    sent: Vec<SentMessage>,
    history_requests: Vec<HistoryRequest>,
    read_marks: Vec<(Jid, Vec<String>)>,
    presence_announcements: u32,
}

pub struct LoopbackEngine {
    inner: Mutex<Inner>,
    event_tx: mpsc::UnboundedSender<WaEvent>,
}

impl LoopbackEngine {
    /// Open the engine with its session store at `<data_dir>/protocol.db`.
    /// A previously paired device identity is restored from it.
    pub fn open(data_dir: &Path) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<WaEvent>)> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| TransportError::SessionStore(e.to_string()))?;
        let db_path = data_dir.join("protocol.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| TransportError::SessionStore(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS engine_state (
                key   TEXT PRIMARY KEY NOT NULL,
                value TEXT
            );",
        )
        .map_err(|e| TransportError::SessionStore(e.to_string()))?;

        let paired = load_device(&conn)?;
        if let Some(ref jid) = paired {
            tracing::info!(device = %jid, "loopback engine restored paired device");
        }

        Ok(Self::build(Some(conn), paired))
    }

    /// An engine with no on-disk session store. Used by tests.
    pub fn ephemeral() -> (Arc<Self>, mpsc::UnboundedReceiver<WaEvent>) {
        Self::build(None, None)
    }

    fn build(
        device_db: Option<Connection>,
        paired: Option<Jid>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<WaEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            inner: Mutex::new(Inner {
                device_db,
                paired,
                connected: false,
                pair_as: Jid::new(DEFAULT_PAIR_USER, Server::User),
                auto_pair: true,
                echo_sent: true,
                contacts: HashMap::new(),
                groups: HashMap::new(),
                numbers: HashMap::new(),
                blobs: HashMap::new(),
                sent: Vec::new(),
                history_requests: Vec::new(),
                read_marks: Vec::new(),
                presence_announcements: 0,
            }),
            event_tx,
        });
        (engine, event_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: WaEvent) {
        // The pump may already be gone during shutdown.
        let _ = self.event_tx.send(event);
    }

    // --- scripting surface -------------------------------------------------

    /// Inject an inbound event as if it arrived from the network.
    pub fn push_event(&self, event: WaEvent) {
        self.emit(event);
    }

    /// Simulate the remote side dropping the connection.
    pub fn drop_connection(&self) {
        self.lock().connected = false;
        self.emit(WaEvent::Disconnected);
    }

    /// Identity to adopt when pairing completes.
    pub fn set_pair_as(&self, jid: Jid) {
        self.lock().pair_as = jid;
    }

    /// Disable the instant-pairing shortcut; `connect` then only emits the
    /// pairing code and waits for [`complete_pairing`] / [`timeout_pairing`].
    ///
    /// [`complete_pairing`]: Self::complete_pairing
    /// [`timeout_pairing`]: Self::timeout_pairing
    pub fn set_manual_pairing(&self) {
        self.lock().auto_pair = false;
    }

    pub fn complete_pairing(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            let jid = inner.pair_as.clone();
            store_device(&mut inner, &jid)?;
            inner.paired = Some(jid);
            inner.connected = true;
        }
        self.emit(WaEvent::PairingSuccess);
        self.emit(WaEvent::Connected);
        Ok(())
    }

    pub fn timeout_pairing(&self) {
        self.emit(WaEvent::PairingTimeout);
    }

    /// Whether sent messages are reflected back as `Message` events.
    pub fn set_echo_sent(&self, echo: bool) {
        self.lock().echo_sent = echo;
    }

    pub fn set_contact(&self, jid: Jid, contact: CachedContact) {
        self.lock().contacts.insert(jid, contact);
    }

    pub fn set_group(&self, info: GroupInfo) {
        self.lock().groups.insert(info.jid.clone(), info);
    }

    /// Register a number as reachable on the network.
    pub fn set_number(&self, number: &str, jid: Jid) {
        self.lock().numbers.insert(number.to_string(), jid);
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    pub fn recorded_history_requests(&self) -> Vec<HistoryRequest> {
        self.lock().history_requests.clone()
    }

    pub fn recorded_read_marks(&self) -> Vec<(Jid, Vec<String>)> {
        self.lock().read_marks.clone()
    }

    pub fn presence_announcements(&self) -> u32 {
        self.lock().presence_announcements
    }

    // --- internals ---------------------------------------------------------

    fn require_connected(&self) -> Result<()> {
        if self.lock().connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn new_raw_id() -> String {
        uuid::Uuid::new_v4().simple().to_string().to_uppercase()
    }
}

#[async_trait::async_trait]
impl WaTransport for LoopbackEngine {
    fn paired_jid(&self) -> Option<Jid> {
        self.lock().paired.clone()
    }

    async fn connect(&self) -> Result<()> {
        let needs_pairing = {
            let mut inner = self.lock();
            if inner.paired.is_some() {
                inner.connected = true;
                false
            } else {
                true
            }
        };

        if !needs_pairing {
            self.emit(WaEvent::Connected);
            return Ok(());
        }

        self.emit(WaEvent::PairingCode(format!(
            "herald-loopback:{}",
            Self::new_raw_id()
        )));

        let auto_pair = self.lock().auto_pair;
        if auto_pair {
            self.complete_pairing()?;
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.lock().connected = false;
    }

    async fn send_presence_available(&self) -> Result<()> {
        self.require_connected()?;
        self.lock().presence_announcements += 1;
        Ok(())
    }

    async fn send_message(&self, chat: &Jid, message: &WaMessage) -> Result<SendReceipt> {
        self.require_connected()?;
        let raw_id = Self::new_raw_id();
        let timestamp = chrono::Utc::now().timestamp();

        let (own, echo) = {
            let mut inner = self.lock();
            inner.sent.push(SentMessage {
                chat: chat.clone(),
                raw_id: raw_id.clone(),
                message: message.clone(),
            });
            (inner.paired.clone(), inner.echo_sent)
        };

        if echo {
            // The server reflects a device's own sends back at it; the
            // session manager persists them from that event, like any other.
            self.emit(WaEvent::Message(crate::events::MessageEvent {
                chat: chat.clone(),
                participant: own,
                from_me: true,
                raw_id: raw_id.clone(),
                timestamp,
                push_name: String::new(),
                message: message.clone(),
            }));
        }

        Ok(SendReceipt {
            id: raw_id,
            timestamp,
        })
    }

    async fn upload_image(&self, data: &[u8], mime: &str) -> Result<MediaRef> {
        self.require_connected()?;
        let id = Self::new_raw_id();
        let url = format!("loopback://media/{id}");
        let media = MediaRef {
            mime: mime.to_string(),
            url: url.clone(),
            direct_path: format!("/loopback/{id}"),
            media_key: id.as_bytes().to_vec(),
            file_sha256: Vec::new(),
            file_enc_sha256: Vec::new(),
            file_length: data.len() as u64,
        };
        self.lock().blobs.insert(url, data.to_vec());
        Ok(media)
    }

    async fn download_media(&self, message: &WaMessage) -> Result<Vec<u8>> {
        self.require_connected()?;
        let media = message
            .media_ref()
            .ok_or_else(|| TransportError::Protocol("message carries no media".to_string()))?;
        self.lock()
            .blobs
            .get(&media.url)
            .cloned()
            .ok_or_else(|| TransportError::Protocol("unknown media reference".to_string()))
    }

    async fn mark_read(&self, chat: &Jid, raw_ids: &[String]) -> Result<()> {
        self.require_connected()?;
        self.lock()
            .read_marks
            .push((chat.clone(), raw_ids.to_vec()));
        Ok(())
    }

    async fn is_on_network(&self, number: &str) -> Result<Option<Jid>> {
        self.require_connected()?;
        Ok(self.lock().numbers.get(number).cloned())
    }

    async fn cached_contact(&self, jid: &Jid) -> Option<CachedContact> {
        self.lock().contacts.get(jid).cloned()
    }

    async fn all_cached_contacts(&self) -> Vec<(Jid, CachedContact)> {
        self.lock()
            .contacts
            .iter()
            .map(|(jid, contact)| (jid.clone(), contact.clone()))
            .collect()
    }

    async fn group_info(&self, jid: &Jid) -> Result<GroupInfo> {
        self.lock()
            .groups
            .get(jid)
            .cloned()
            .ok_or_else(|| TransportError::Protocol(format!("unknown group {jid}")))
    }

    async fn request_history(&self, anchor: &HistoryAnchor, count: u32) -> Result<()> {
        self.require_connected()?;
        tracing::debug!(
            chat = %anchor.chat,
            anchor_id = %anchor.raw_id,
            anchor_ts = anchor.timestamp,
            count,
            "recorded history request"
        );
        self.lock().history_requests.push(HistoryRequest {
            anchor: anchor.clone(),
            count,
        });
        Ok(())
    }
}

fn load_device(conn: &Connection) -> Result<Option<Jid>> {
    use rusqlite::OptionalExtension;
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM engine_state WHERE key = 'device_jid'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| TransportError::SessionStore(e.to_string()))?;
    match value {
        Some(s) => Jid::parse(&s)
            .map(Some)
            .map_err(|e| TransportError::SessionStore(e.to_string())),
        None => Ok(None),
    }
}

fn store_device(inner: &mut Inner, jid: &Jid) -> Result<()> {
    if let Some(ref conn) = inner.device_db {
        conn.execute(
            "INSERT OR REPLACE INTO engine_state (key, value) VALUES ('device_jid', ?1)",
            [jid.to_string()],
        )
        .map_err(|e| TransportError::SessionStore(e.to_string()))?;
    }
    Ok(())
}
