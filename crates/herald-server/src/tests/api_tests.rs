use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine as _;

use herald_proto::{MessageEvent, WaEvent};
use herald_shared::{Jid, Server, WaMessage};

use super::*;

fn inbound_text(chat: &Jid, raw_id: &str, ts: i64, body: &str) -> WaEvent {
    WaEvent::Message(MessageEvent {
        chat: chat.clone(),
        participant: Some(chat.clone()),
        from_me: false,
        raw_id: raw_id.to_string(),
        timestamp: ts,
        push_name: String::new(),
        message: WaMessage::Text {
            text: body.to_string(),
        },
    })
}

#[tokio::test]
async fn health_is_open_everything_else_is_keyed() {
    let h = harness().await;

    let no_key = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&h.router, no_key).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert!(json["timestamp"].as_i64().is_some());

    let no_key = Request::builder()
        .method("GET")
        .uri("/chats")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&h.router, no_key).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().unwrap().contains("API key"));

    let wrong_key = Request::builder()
        .method("GET")
        .uri("/chats")
        .header("x-api-key", "wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.router, wrong_key).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn basic_send_round_trips_through_messages() {
    let h = harness().await;

    let (status, json) = send(
        &h.router,
        post_json(
            "/send",
            serde_json::json!({"chatId": "10000000001@c.us", "message": "hi"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    let message_id = json["messageId"].as_str().unwrap().to_string();
    assert!(message_id.starts_with("true_10000000001@c.us_"));

    // The echoed event lands asynchronously.
    let store = h.store.clone();
    wait_for(move || store.message_count("10000000001@s.whatsapp.net").unwrap() == 1).await;

    let (status, json) = send(&h.router, get("/chats/10000000001@c.us/messages?limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["fromCache"], true);
    assert_eq!(json["messages"][0]["id"], message_id);
    assert_eq!(json["messages"][0]["body"], "hi");
    assert_eq!(json["messages"][0]["fromMe"], true);
}

#[tokio::test]
async fn reply_carries_quote_context_into_the_frame() {
    let h = harness().await;

    let (_, json) = send(
        &h.router,
        post_json(
            "/send",
            serde_json::json!({"chatId": "10000000001@c.us", "message": "hi"}),
        ),
    )
    .await;
    let quoted_id = json["messageId"].as_str().unwrap().to_string();
    let raw_quoted = quoted_id.rsplit('_').next().unwrap().to_string();

    let (status, json) = send(
        &h.router,
        post_json(
            "/send",
            serde_json::json!({
                "chatId": "10000000001@c.us",
                "message": "re",
                "quotedMessageId": quoted_id,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let sent = h.engine.sent_messages();
    assert_eq!(sent.len(), 2);
    match &sent[1].message {
        WaMessage::ExtendedText { text, context } => {
            assert_eq!(text, "re");
            let ctx = context.as_ref().expect("reply context");
            assert_eq!(ctx.stanza_id, raw_quoted);
            assert_eq!(ctx.participant, "10000000001@c.us");
        }
        other => panic!("expected extended text, got {other:?}"),
    }
}

#[tokio::test]
async fn send_validates_input() {
    let h = harness().await;

    let (status, _) = send(
        &h.router,
        post_json("/send", serde_json::json!({"chatId": "", "message": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        &h.router,
        post_json(
            "/send",
            serde_json::json!({
                "chatId": "10000000001@c.us",
                "message": "x".repeat(64 * 1024 + 1),
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("too long"));

    let (status, _) = send(
        &h.router,
        post_json(
            "/send",
            serde_json::json!({
                "chatId": "10000000001@c.us",
                "message": "x",
                "quotedMessageId": "garbage",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unread_increments_then_mark_read_clears() {
    let h = harness().await;
    let chat = Jid::new("20000000002", Server::User);

    h.engine.push_event(inbound_text(&chat, "M1", 1700000000, "yo"));
    let store = h.store.clone();
    wait_for(move || store.message_count("20000000002@s.whatsapp.net").unwrap() == 1).await;

    let (_, json) = send(&h.router, get("/chats")).await;
    assert_eq!(json["chats"][0]["unreadCount"], 1);
    assert_eq!(json["chats"][0]["id"], "20000000002@c.us");

    let (status, json) = send(&h.router, post_empty("/mark-read/20000000002@c.us")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (_, json) = send(&h.router, get("/chats")).await;
    assert_eq!(json["chats"][0]["unreadCount"], 0);

    // The remote read receipt targeted the latest stored message.
    let marks = h.engine.recorded_read_marks();
    assert_eq!(marks.len(), 1);
    assert_eq!(marks[0].0, chat);
    assert_eq!(marks[0].1, vec!["M1".to_string()]);
}

#[tokio::test]
async fn search_round_trip() {
    let h = harness().await;
    let chat_a = Jid::new("10000000001", Server::User);
    let chat_b = Jid::new("10000000002", Server::User);

    h.engine
        .push_event(inbound_text(&chat_a, "A", 1700000000, "hello world"));
    h.engine
        .push_event(inbound_text(&chat_b, "B", 1700000100, "goodbye"));
    let store = h.store.clone();
    wait_for(move || store.total_message_count().unwrap() == 2).await;

    let (status, json) = send(&h.router, get("/search?q=hello")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["results"][0]["chatJid"], "10000000001@c.us");
    assert_eq!(json["results"][0]["body"], "hello world");

    let (status, _) = send(&h.router, get("/search")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sync_history_anchors_on_the_oldest_message() {
    let h = harness().await;
    let chat = Jid::new("10000000001", Server::User);

    for (raw_id, ts) in [("A", 100), ("B", 200), ("C", 300)] {
        h.engine.push_event(inbound_text(&chat, raw_id, ts, "m"));
    }
    let store = h.store.clone();
    wait_for(move || store.message_count("10000000001@s.whatsapp.net").unwrap() == 3).await;

    let (status, json) = send(
        &h.router,
        post_json(
            "/sync-history",
            serde_json::json!({"chatId": "10000000001@c.us", "count": 50}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["requested"], 50);
    assert_eq!(json["currentCount"], 3);

    let requests = h.engine.recorded_history_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].anchor.timestamp, 100);
    assert_eq!(requests[0].anchor.raw_id, "A");
}

#[tokio::test]
async fn contacts_return_canonical_api_identifiers() {
    let h = harness().await;

    h.store
        .upsert_contact(
            "10000000001@s.whatsapp.net",
            "Alice Smith",
            "",
            "10000000001",
            false,
        )
        .unwrap();
    h.store
        .upsert_chat("10000000001@s.whatsapp.net", "", false, None, None)
        .unwrap();
    h.store.increment_unread("10000000001@s.whatsapp.net").unwrap();

    let (status, json) = send(&h.router, get("/contacts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["contacts"][0]["id"], "10000000001@c.us");
    assert_eq!(json["contacts"][0]["name"], "Alice Smith");

    // The API-form id addresses the same row.
    let (status, _) = send(&h.router, post_empty("/mark-read/10000000001@c.us")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.store.get_chats().unwrap()[0].unread_count, 0);
}

#[tokio::test]
async fn deep_sync_start_conflicts_while_running_and_reports_progress() {
    let h = harness().await;
    for i in 1..=3 {
        h.store
            .upsert_chat(&format!("1000000000{i}@s.whatsapp.net"), "", false, None, None)
            .unwrap();
    }

    let (status, json) = send(&h.router, post_empty("/deep-sync")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (status, json) = send(&h.router, post_empty("/deep-sync")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("already in progress"));

    // Wait for the background pass to finish and check the record shape.
    let mut finished = false;
    for _ in 0..500 {
        let (_, json) = send(&h.router, get("/deep-sync")).await;
        if json["running"] == false && json["completedChats"] == 3 {
            assert_eq!(json["totalChats"], 3);
            assert_eq!(json["totalNewMessages"], 0);
            assert_eq!(json["results"][0]["status"], "complete");
            finished = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(finished, "deep sync did not finish");
}

#[tokio::test]
async fn status_and_qr_report_connection_state() {
    let h = harness().await;

    let (status, json) = send(&h.router, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ready");
    assert_eq!(json["ready"], true);
    assert!(json["lastConnectedAt"].as_i64().is_some());

    let (status, json) = send(&h.router, get("/qr")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Already connected");
    assert!(json.get("qr").is_none());
}

#[tokio::test]
async fn resolve_number_maps_to_chat_id_or_404() {
    let h = harness().await;
    h.engine
        .set_number("15551234567", Jid::new("15551234567", Server::User));

    let (status, json) = send(
        &h.router,
        post_json("/resolve-number", serde_json::json!({"number": "+1 555-123-4567"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["chatId"], "15551234567@c.us");

    let (status, json) = send(
        &h.router,
        post_json("/resolve-number", serde_json::json!({"number": "+1 555-000-0000"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not on WhatsApp"));
}

#[tokio::test]
async fn send_image_then_download_media_round_trips() {
    let h = harness().await;

    let png = b"\x89PNG\r\n\x1a\nfake image payload".to_vec();
    let encoded = base64::engine::general_purpose::STANDARD.encode(&png);

    let (status, json) = send(
        &h.router,
        post_json(
            "/send-image",
            serde_json::json!({
                "chatId": "10000000001@c.us",
                "base64": format!("data:image/png;base64,{encoded}"),
                "caption": "look",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let message_id = json["messageId"].as_str().unwrap().to_string();

    // Wait for the echoed event to persist the raw payload.
    let store = h.store.clone();
    let id = message_id.clone();
    wait_for(move || store.raw_message(&id).is_ok()).await;

    let msgs = h
        .store
        .get_messages("10000000001@s.whatsapp.net", 1, 0)
        .unwrap();
    assert!(msgs[0].has_media);
    assert_eq!(msgs[0].media_kind.as_deref(), Some("image"));
    assert_eq!(msgs[0].body, "look");

    let (status, json) = send(
        &h.router,
        post_json("/download-media", serde_json::json!({"messageId": message_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["mimetype"], "image/png");
    let data = base64::engine::general_purpose::STANDARD
        .decode(json["data"].as_str().unwrap())
        .unwrap();
    assert_eq!(data, png);
}

#[tokio::test]
async fn download_media_404s_for_text_messages() {
    let h = harness().await;
    let chat = Jid::new("10000000001", Server::User);
    h.engine.push_event(inbound_text(&chat, "T1", 100, "text"));
    let store = h.store.clone();
    wait_for(move || store.message_count("10000000001@s.whatsapp.net").unwrap() == 1).await;

    let (status, _) = send(
        &h.router,
        post_json(
            "/download-media",
            serde_json::json!({"messageId": "false_10000000001@c.us_T1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_chat_removes_chat_and_messages() {
    let h = harness().await;
    let chat = Jid::new("10000000001", Server::User);
    h.engine.push_event(inbound_text(&chat, "D1", 100, "bye"));
    let store = h.store.clone();
    wait_for(move || store.message_count("10000000001@s.whatsapp.net").unwrap() == 1).await;

    let (status, json) = send(&h.router, delete("/chats/10000000001@c.us")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (_, json) = send(&h.router, get("/chats")).await;
    assert_eq!(json["chats"].as_array().unwrap().len(), 0);

    let (_, json) = send(&h.router, get("/chats/10000000001@c.us/messages")).await;
    assert_eq!(json["messages"].as_array().unwrap().len(), 0);
    assert_eq!(json["empty"], true);
}

#[tokio::test]
async fn sync_all_requests_every_chat() {
    let h = harness().await;
    for i in 1..=2 {
        h.store
            .upsert_chat(&format!("1000000000{i}@s.whatsapp.net"), "", false, None, None)
            .unwrap();
    }

    let (status, json) = send(&h.router, post_empty("/sync-all?count=25")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["chatsCount"], 2);
    assert_eq!(json["requested"], 25);
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r["status"] == "requested"));

    assert_eq!(h.engine.recorded_history_requests().len(), 2);
}
