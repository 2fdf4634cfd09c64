//! On-demand history backfill.
//!
//! Single-chat requests anchor on the oldest stored message so history pages
//! backwards; the deep sync walks every chat, repeating requests until the
//! message count stops growing. All of it is best-effort: the primary device
//! is free to ignore any request, and results arrive later as ordinary
//! history-sync events.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use herald_proto::{HistoryAnchor, WaTransport};
use herald_shared::jid::to_api_string;
use herald_shared::Jid;
use herald_store::{Store, StoreError};

use crate::error::{Result, SessionError};

/// Knobs of the deep-sync loop. Tests shrink the durations.
#[derive(Debug, Clone)]
pub struct SyncTuning {
    /// Rounds per chat before giving up.
    pub max_rounds: u32,
    /// Deadline for issuing one history request.
    pub round_deadline: Duration,
    /// Settle time for inbound events to land after each request.
    pub settle: Duration,
    /// Messages requested per round.
    pub page_size: u32,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            round_deadline: Duration::from_secs(30),
            settle: Duration::from_secs(10),
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeepSyncChatResult {
    #[serde(rename = "chatId")]
    pub chat_jid: String,
    #[serde(rename = "messagesBefore")]
    pub before: i64,
    #[serde(rename = "messagesAfter")]
    pub after: i64,
    #[serde(rename = "newMessages")]
    pub new: i64,
    pub rounds: u32,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepSyncProgress {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    pub total_chats: usize,
    pub current_chat: String,
    pub chat_index: usize,
    pub results: Vec<DeepSyncChatResult>,
    #[serde(rename = "totalNewMessages")]
    pub total_new: i64,
}

pub struct HistoryController {
    transport: Arc<dyn WaTransport>,
    store: Arc<Store>,
    tuning: SyncTuning,
    progress: tokio::sync::Mutex<DeepSyncProgress>,
    /// Self-handle for the background deep-sync task.
    weak: Weak<HistoryController>,
}

impl HistoryController {
    pub fn new(transport: Arc<dyn WaTransport>, store: Arc<Store>) -> Arc<Self> {
        Self::with_tuning(transport, store, SyncTuning::default())
    }

    pub fn with_tuning(
        transport: Arc<dyn WaTransport>,
        store: Arc<Store>,
        tuning: SyncTuning,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            transport,
            store,
            tuning,
            progress: tokio::sync::Mutex::new(DeepSyncProgress::default()),
            weak: weak.clone(),
        })
    }

    /// Ask for `count` messages preceding the chat's oldest stored message.
    /// A chat with no rows gets a synthetic anchor at the current time.
    pub async fn request_history(&self, chat: &Jid, count: u32) -> Result<()> {
        let chat_str = chat.to_string();
        let anchor = match self.store.oldest_message(&chat_str) {
            Ok(oldest) => HistoryAnchor {
                chat: chat.clone(),
                raw_id: oldest.raw_id,
                from_me: oldest.from_me,
                timestamp: oldest.timestamp,
            },
            Err(StoreError::NotFound) => {
                info!(chat = %chat_str, "no stored messages, anchoring at now");
                HistoryAnchor::now(chat.clone())
            }
            Err(e) => return Err(e.into()),
        };

        self.transport.request_history(&anchor, count).await?;
        info!(
            chat = %chat_str,
            count,
            anchor_ts = anchor.timestamp,
            "requested history before anchor"
        );
        Ok(())
    }

    /// Ask for the latest `count` messages by anchoring at the current time.
    pub async fn request_recent(&self, chat: &Jid, count: u32) -> Result<()> {
        let anchor = HistoryAnchor::now(chat.clone());
        self.transport.request_history(&anchor, count).await?;
        info!(chat = %chat, count, "requested recent messages");
        Ok(())
    }

    /// Snapshot of the deep-sync progress record.
    pub async fn progress(&self) -> DeepSyncProgress {
        self.progress.lock().await.clone()
    }

    /// Start a deep sync in the background. Errors with
    /// [`SessionError::DeepSyncRunning`] when one is already in flight.
    pub async fn start_deep_sync(&self) -> Result<()> {
        {
            let mut progress = self.progress.lock().await;
            if progress.running {
                return Err(SessionError::DeepSyncRunning);
            }
            *progress = DeepSyncProgress {
                running: true,
                started_at: Some(chrono::Utc::now().timestamp()),
                ..DeepSyncProgress::default()
            };
        }

        let Some(controller) = self.weak.upgrade() else {
            return Ok(());
        };
        tokio::spawn(async move {
            controller.run_deep_sync().await;

            let mut progress = controller.progress.lock().await;
            progress.running = false;
            progress.current_chat.clear();
            info!(total_new = progress.total_new, "deep sync complete");
        });
        Ok(())
    }

    async fn run_deep_sync(&self) {
        let chat_jids = match self.store.all_chat_jids() {
            Ok(jids) => jids,
            Err(e) => {
                warn!(error = %e, "deep sync: failed to list chats");
                return;
            }
        };

        self.progress.lock().await.total_chats = chat_jids.len();

        for (i, jid_str) in chat_jids.iter().enumerate() {
            {
                let mut progress = self.progress.lock().await;
                progress.current_chat = to_api_string(jid_str);
                progress.chat_index = i + 1;
            }

            let result = self.sync_one_chat(jid_str).await;

            let mut progress = self.progress.lock().await;
            progress.total_new += result.new;
            progress.results.push(result);
        }
    }

    /// Request pages for one chat until a round brings nothing new.
    async fn sync_one_chat(&self, jid_str: &str) -> DeepSyncChatResult {
        let before = self.store.message_count(jid_str).unwrap_or(0);
        let mut last_count = before;
        let mut rounds = 0u32;
        let mut stale_rounds = 0u32;

        let Ok(chat) = Jid::parse(jid_str) else {
            warn!(chat = %jid_str, "deep sync: unparseable chat jid");
            return DeepSyncChatResult {
                chat_jid: to_api_string(jid_str),
                before,
                after: before,
                new: 0,
                rounds: 0,
                status: "complete".to_string(),
            };
        };

        while stale_rounds < 1 && rounds < self.tuning.max_rounds {
            let request = self.request_history(&chat, self.tuning.page_size);
            match tokio::time::timeout(self.tuning.round_deadline, request).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(chat = %jid_str, round = rounds + 1, error = %e, "deep sync request failed");
                    break;
                }
                Err(_) => {
                    warn!(chat = %jid_str, round = rounds + 1, "deep sync request timed out");
                    break;
                }
            }
            rounds += 1;

            tokio::time::sleep(self.tuning.settle).await;

            let current = self.store.message_count(jid_str).unwrap_or(last_count);
            if current == last_count {
                stale_rounds += 1;
            } else {
                stale_rounds = 0;
            }
            last_count = current;
            info!(chat = %jid_str, round = rounds, messages = current, "deep sync round");
        }

        let after = self.store.message_count(jid_str).unwrap_or(before);
        let status = if rounds >= self.tuning.max_rounds && stale_rounds == 0 {
            "max_rounds"
        } else {
            "complete"
        };

        DeepSyncChatResult {
            chat_jid: to_api_string(jid_str),
            before,
            after,
            new: after - before,
            rounds,
            status: status.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_serialises_with_frontend_names() {
        let progress = DeepSyncProgress {
            running: true,
            started_at: Some(1700000000),
            total_chats: 3,
            current_chat: "10000000001@c.us".to_string(),
            chat_index: 1,
            results: vec![DeepSyncChatResult {
                chat_jid: "10000000002@c.us".to_string(),
                before: 10,
                after: 25,
                new: 15,
                rounds: 2,
                status: "complete".to_string(),
            }],
            total_new: 15,
        };

        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["totalChats"], 3);
        assert_eq!(json["totalNewMessages"], 15);
        assert_eq!(json["results"][0]["chatId"], "10000000002@c.us");
        assert_eq!(json["results"][0]["messagesBefore"], 10);
        assert_eq!(json["results"][0]["newMessages"], 15);
    }
}
