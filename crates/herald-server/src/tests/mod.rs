//! In-process API test harness: the real router over a throwaway store and
//! the loopback engine.

mod api_tests;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use herald_proto::{LoopbackEngine, WaTransport};
use herald_session::{HistoryController, Session, SessionTimings, SyncTuning};
use herald_store::Store;

use crate::api::{build_router, AppState};

pub const TEST_KEY: &str = "0123456789abcdef0123456789abcdef";

pub struct TestHarness {
    pub _dir: tempfile::TempDir,
    pub store: Arc<Store>,
    pub engine: Arc<LoopbackEngine>,
    pub session: Arc<Session>,
    pub router: Router,
}

pub async fn harness() -> TestHarness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(Store::open_at(&dir.path().join("app.db")).expect("open store"));
    let (engine, events) = LoopbackEngine::ephemeral();
    let transport: Arc<dyn WaTransport> = engine.clone();

    let history = HistoryController::with_tuning(
        transport.clone(),
        store.clone(),
        SyncTuning {
            max_rounds: 2,
            round_deadline: Duration::from_secs(1),
            settle: Duration::from_millis(10),
            page_size: 50,
        },
    );
    let session = Session::with_timings(
        transport.clone(),
        events,
        store.clone(),
        history.clone(),
        SessionTimings {
            reconnect_delay: Duration::from_millis(10),
            recent_sync_delay: Duration::from_millis(10),
            recent_sync_spacing: Duration::from_millis(1),
            recent_sync_deadline: Duration::from_secs(5),
        },
    );

    session.connect().await.expect("connect");
    let ready = session.clone();
    wait_for(move || ready.is_ready()).await;

    let router = build_router(AppState {
        session: session.clone(),
        store: store.clone(),
        history,
        transport,
        api_key: Arc::new(TEST_KEY.to_string()),
    });

    TestHarness {
        _dir: dir,
        store,
        engine,
        session,
        router,
    }
}

pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within deadline");
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("x-api-key", TEST_KEY)
        .body(Body::empty())
        .unwrap()
}

pub fn delete(path: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(path)
        .header("x-api-key", TEST_KEY)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("x-api-key", TEST_KEY)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

pub fn post_empty(path: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("x-api-key", TEST_KEY)
        .body(Body::empty())
        .unwrap()
}

/// Dispatch a request through the router and decode the JSON body.
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.expect("dispatch");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, json)
}
