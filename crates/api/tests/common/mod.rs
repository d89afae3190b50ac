#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use worktrack_api::config::{LogFormat, ServerConfig};
use worktrack_api::router::build_app_router;
use worktrack_api::state::AppState;
use worktrack_events::{EventHub, DEFAULT_SUBSCRIBER_CAPACITY};
use worktrack_lifecycle::memory::MemoryStore;
use worktrack_lifecycle::{ServiceSettings, SessionService};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        database_url: "postgres://unused".to_string(),
        host: IpAddr::from([127, 0, 0, 1]),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        storage_timeout_secs: 5,
        default_session_minutes: 60,
        subscriber_queue_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        db_max_connections: 1,
        log_format: LogFormat::Pretty,
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub hub: Arc<EventHub>,
    pub sessions: Arc<SessionService>,
}

/// Build the full application router over an in-memory store.
pub fn build_test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let hub = EventHub::start(config.subscriber_queue_capacity);
    let sessions = Arc::new(
        SessionService::new(store.clone(), hub.clone(), ServiceSettings::default())
            .expect("valid settings"),
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        sessions: Arc::clone(&sessions),
        hub: Arc::clone(&hub),
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
        hub,
        sessions,
    }
}

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &TestApp, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

/// POST a raw, possibly malformed, JSON body.
pub async fn post_raw(app: &TestApp, uri: &str, body: &'static str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
