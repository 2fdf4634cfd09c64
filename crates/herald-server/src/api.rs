//! HTTP surface for the launcher front-end.
//!
//! Chat ids cross this boundary in API form (`@c.us`) and are converted to
//! internal form before touching the store. Message ids are opaque strings
//! round-tripped through [`MessageKey`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use herald_proto::WaTransport;
use herald_session::{HistoryController, Session};
use herald_shared::jid::{parse_api, to_internal_string};
use herald_shared::{
    ConnectionStatus, Message, MessageKey, QrResponse, RawKey, ReplyContext, SearchResult,
    WaMessage,
};
use herald_store::Store;

use crate::auth;
use crate::error::ApiError;
use crate::qr;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const REACT_TIMEOUT: Duration = Duration::from_secs(15);
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);
const SYNC_ONE_TIMEOUT: Duration = Duration::from_secs(30);
const SYNC_ALL_TIMEOUT: Duration = Duration::from_secs(120);
const SYNC_ALL_SPACING: Duration = Duration::from_millis(200);
const MARK_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Practical limit the network imposes on a text message.
const MAX_MESSAGE_LEN: usize = 64 * 1024;
/// Router-level body cap, sized for base64 image uploads.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub store: Arc<Store>,
    pub history: Arc<HistoryController>,
    pub transport: Arc<dyn WaTransport>,
    pub api_key: Arc<String>,
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/status", get(status))
        .route("/qr", get(qr_code))
        .route("/contacts", get(contacts))
        .route("/chats", get(chats))
        .route("/chats/{chat_id}/messages", get(messages))
        .route("/chats/{chat_id}", delete(delete_chat))
        .route("/mark-read/{chat_id}", post(mark_read))
        .route("/send", post(send))
        .route("/send-image", post(send_image))
        .route("/react", post(react))
        .route("/download-media", post(download_media))
        .route("/resolve-number", post(resolve_number))
        .route("/sync-history", post(sync_history))
        .route("/sync-all", post(sync_all))
        .route("/deep-sync", post(deep_sync_start).get(deep_sync_progress))
        .route("/search", get(search))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn with_deadline<T, E>(
    deadline: Duration,
    fut: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T, ApiError>
where
    ApiError: From<E>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ApiError::Transient("request timed out".to_string())),
    }
}

fn require_ready(state: &AppState) -> Result<(), ApiError> {
    if state.session.is_ready() {
        Ok(())
    } else {
        Err(ApiError::NotReady)
    }
}

// --- request / response bodies ---------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessagesResponse {
    messages: Vec<Message>,
    from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    empty: Option<bool>,
}

#[derive(Deserialize)]
struct MessagesQuery {
    limit: Option<i64>,
    before: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    chat_id: String,
    message: String,
    #[serde(default)]
    quoted_message_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendImageRequest {
    chat_id: String,
    base64: String,
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactRequest {
    message_id: String,
    emoji: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadMediaRequest {
    message_id: String,
}

#[derive(Deserialize)]
struct ResolveNumberRequest {
    number: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncHistoryRequest {
    chat_id: String,
    #[serde(default)]
    count: Option<u32>,
}

#[derive(Deserialize)]
struct CountQuery {
    count: Option<u32>,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
    count: usize,
}

// --- handlers ---------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

async fn status(State(state): State<AppState>) -> Json<herald_shared::StatusResponse> {
    Json(state.session.status())
}

async fn qr_code(State(state): State<AppState>) -> Json<QrResponse> {
    if let Some(code) = state.session.qr_code() {
        return match qr::data_url(&code) {
            Ok(url) => Json(QrResponse {
                qr: Some(url),
                message: None,
            }),
            Err(e) => Json(QrResponse {
                qr: None,
                message: Some(format!("Error generating QR: {e}")),
            }),
        };
    }

    let message = match state.session.current_status() {
        ConnectionStatus::Ready => "Already connected".to_string(),
        ConnectionStatus::Connecting => "Connecting...".to_string(),
        ConnectionStatus::Authenticated => "Authenticated, waiting for ready state".to_string(),
        other => format!("No QR code available (status: {})", other.as_str()),
    };
    Json(QrResponse {
        qr: None,
        message: Some(message),
    })
}

async fn contacts(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let contacts = state.store.get_contacts()?;
    Ok(Json(serde_json::json!({ "contacts": contacts })))
}

async fn chats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let chats = state.store.get_chats()?;
    Ok(Json(serde_json::json!({ "chats": chats })))
}

async fn messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(50);
    let before_ts = query.before.filter(|b| *b > 0).unwrap_or(0);

    let internal = to_internal_string(&chat_id);
    let messages = state.store.get_messages(&internal, limit, before_ts)?;

    let empty = messages.is_empty().then_some(true);
    Ok(Json(MessagesResponse {
        messages,
        from_cache: true,
        empty,
    }))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let internal = to_internal_string(&chat_id);
    state.store.mark_read(&internal)?;

    // Best effort: also send a read receipt for the latest stored message so
    // the other devices agree.
    if let Ok(latest_id) = state.store.latest_message_id(&internal) {
        if let Ok(key) = MessageKey::parse(&latest_id) {
            if let Ok(chat) = parse_api(&key.chat) {
                let receipt = state
                    .transport
                    .mark_read(&chat, std::slice::from_ref(&key.raw_id));
                match tokio::time::timeout(MARK_READ_TIMEOUT, receipt).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(chat = %chat_id, error = %e, "remote mark-read failed"),
                    Err(_) => warn!(chat = %chat_id, "remote mark-read timed out"),
                }
            }
        }
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

async fn send(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.chat_id.is_empty() || req.message.is_empty() {
        return Err(ApiError::Invalid(
            "chatId and message are required".to_string(),
        ));
    }
    if req.message.len() > MAX_MESSAGE_LEN {
        return Err(ApiError::Invalid("message too long (max 64KB)".to_string()));
    }
    require_ready(&state)?;

    let chat = parse_api(&req.chat_id)
        .map_err(|e| ApiError::Invalid(format!("invalid chatId: {e}")))?;

    let message = match req.quoted_message_id.as_deref().filter(|s| !s.is_empty()) {
        Some(quoted) => {
            let key = MessageKey::parse(quoted)
                .map_err(|_| ApiError::Invalid("invalid quotedMessageId format".to_string()))?;
            WaMessage::ExtendedText {
                text: req.message,
                context: Some(ReplyContext {
                    stanza_id: key.raw_id,
                    participant: key.chat,
                }),
            }
        }
        None => WaMessage::Text { text: req.message },
    };

    let receipt = with_deadline(SEND_TIMEOUT, state.transport.send_message(&chat, &message)).await?;

    let message_id = MessageKey::new(true, chat.to_api(), receipt.id).format();
    Ok(Json(serde_json::json!({
        "success": true,
        "messageId": message_id,
    })))
}

async fn send_image(
    State(state): State<AppState>,
    Json(req): Json<SendImageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.chat_id.is_empty() || req.base64.is_empty() {
        return Err(ApiError::Invalid(
            "chatId and base64 are required".to_string(),
        ));
    }
    require_ready(&state)?;

    let chat = parse_api(&req.chat_id)
        .map_err(|e| ApiError::Invalid(format!("invalid chatId: {e}")))?;

    let raw = strip_data_url(&req.base64);
    let data = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| ApiError::Invalid(format!("invalid base64: {e}")))?;

    let mime = image::guess_format(&data)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");

    let media = with_deadline(UPLOAD_TIMEOUT, state.transport.upload_image(&data, mime)).await?;

    let message = WaMessage::Image {
        media,
        caption: req.caption.filter(|c| !c.is_empty()),
    };
    let receipt = with_deadline(UPLOAD_TIMEOUT, state.transport.send_message(&chat, &message)).await?;

    let message_id = MessageKey::new(true, chat.to_api(), receipt.id).format();
    Ok(Json(serde_json::json!({
        "success": true,
        "messageId": message_id,
    })))
}

async fn react(
    State(state): State<AppState>,
    Json(req): Json<ReactRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.message_id.is_empty() || req.emoji.is_empty() {
        return Err(ApiError::Invalid(
            "messageId and emoji are required".to_string(),
        ));
    }
    require_ready(&state)?;

    let key = MessageKey::parse(&req.message_id)
        .map_err(|_| ApiError::Invalid("invalid messageId format".to_string()))?;
    let chat = parse_api(&key.chat)
        .map_err(|e| ApiError::Invalid(format!("invalid messageId chat: {e}")))?;

    let message = WaMessage::Reaction {
        target: RawKey {
            remote_jid: chat.to_string(),
            from_me: key.from_me,
            id: key.raw_id,
        },
        emoji: req.emoji,
    };

    with_deadline(REACT_TIMEOUT, state.transport.send_message(&chat, &message)).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn download_media(
    State(state): State<AppState>,
    Json(req): Json<DownloadMediaRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.message_id.is_empty() {
        return Err(ApiError::Invalid("messageId is required".to_string()));
    }
    require_ready(&state)?;

    let raw = state.store.raw_message(&req.message_id).map_err(|_| {
        ApiError::NotFound("no stored media payload for this message".to_string())
    })?;
    let message = WaMessage::from_bytes(&raw)
        .map_err(|e| ApiError::Internal(format!("corrupt stored message payload: {e}")))?;

    let data = state.transport.download_media(&message).await?;

    Ok(Json(serde_json::json!({
        "data": base64::engine::general_purpose::STANDARD.encode(data),
        "mimetype": message.media_mime(),
    })))
}

async fn resolve_number(
    State(state): State<AppState>,
    Json(req): Json<ResolveNumberRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.number.is_empty() {
        return Err(ApiError::Invalid("number is required".to_string()));
    }
    require_ready(&state)?;

    let cleaned: String = req
        .number
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-'))
        .collect();

    let resolved = with_deadline(
        RESOLVE_TIMEOUT,
        state.transport.is_on_network(&cleaned),
    )
    .await?;

    match resolved {
        Some(jid) => Ok(Json(serde_json::json!({ "chatId": jid.to_api() }))),
        None => Err(ApiError::NotFound("number not on WhatsApp".to_string())),
    }
}

async fn sync_history(
    State(state): State<AppState>,
    Json(req): Json<SyncHistoryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.chat_id.is_empty() {
        return Err(ApiError::Invalid("chatId is required".to_string()));
    }
    let count = req.count.filter(|c| *c > 0).unwrap_or(50);

    let chat = parse_api(&req.chat_id)
        .map_err(|e| ApiError::Invalid(format!("invalid chatId: {e}")))?;

    with_deadline(SYNC_ONE_TIMEOUT, state.history.request_history(&chat, count)).await?;

    let current = state.store.message_count(&chat.to_string())?;
    Ok(Json(serde_json::json!({
        "success": true,
        "chatId": req.chat_id,
        "requested": count,
        "currentCount": current,
        "note": "Messages will arrive asynchronously via history sync events. Check back in a few seconds.",
    })))
}

async fn sync_all(
    State(state): State<AppState>,
    Query(query): Query<CountQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let count = query.count.filter(|c| *c > 0).unwrap_or(50);
    let chat_jids = state.store.all_chat_jids()?;
    let deadline = Instant::now() + SYNC_ALL_TIMEOUT;

    let mut results = Vec::with_capacity(chat_jids.len());
    for jid_str in &chat_jids {
        let outcome = match herald_shared::Jid::parse(jid_str).map_err(|e| e.to_string()) {
            Ok(chat) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    Err("sync-all deadline exceeded".to_string())
                } else {
                    match tokio::time::timeout(remaining, state.history.request_history(&chat, count))
                        .await
                    {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err("sync-all deadline exceeded".to_string()),
                    }
                }
            }
            Err(e) => Err(e),
        };

        let current = state.store.message_count(jid_str).unwrap_or(0);
        let mut entry = serde_json::json!({
            "chatId": herald_shared::jid::to_api_string(jid_str),
            "status": if outcome.is_ok() { "requested" } else { "error" },
            "currentCount": current,
        });
        if let Err(msg) = outcome {
            entry["error"] = serde_json::Value::String(msg);
        }
        results.push(entry);

        // Spacing keeps the primary device from rate-limiting us.
        tokio::time::sleep(SYNC_ALL_SPACING).await;
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "chatsCount": chat_jids.len(),
        "requested": count,
        "results": results,
    })))
}

async fn deep_sync_start(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.history.start_deep_sync().await?;
    info!("deep sync started");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Deep sync started in background. GET /deep-sync to check progress.",
    })))
}

async fn deep_sync_progress(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let progress = state.history.progress().await;
    let total_messages = state.store.total_message_count().unwrap_or(0);

    Ok(Json(serde_json::json!({
        "running": progress.running,
        "startedAt": progress.started_at,
        "totalChats": progress.total_chats,
        "currentChat": progress.current_chat,
        "chatIndex": progress.chat_index,
        "completedChats": progress.results.len(),
        "totalNewMessages": progress.total_new,
        "totalMessages": total_messages,
        "results": progress.results,
    })))
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let q = query
        .q
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::Invalid("q parameter is required".to_string()))?;
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(50);

    let results = state.store.search_messages(&q, limit)?;
    let count = results.len();
    Ok(Json(SearchResponse { results, count }))
}

async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let internal = to_internal_string(&chat_id);
    state.store.delete_chat(&internal)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

fn strip_data_url(s: &str) -> &str {
    match s.find(";base64,") {
        Some(idx) => &s[idx + 8..],
        None => s,
    }
}
