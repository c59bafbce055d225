//! Integration tests for the management HTTP API.

mod common;

use axum::Router;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Method, Request, StatusCode};
use common::{StubRepository, TestEnv};
use rostore::config::{ConfigState, RemoteManagement, load_config};
use rostore::management::{AuthGuard, AuthSettings, ManagementHandler, hash_secret, router};
use rostore::sync::SyncScheduler;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SECRET: &str = "s3cret";
const READ_ONLY: &str = "/v0/management/storage/readonly";
const SYNC_INTERVAL: &str = "/v0/management/storage/sync-interval";
const STATUS: &str = "/v0/management/storage/status";

struct Api {
    env: TestEnv,
    handler: Arc<ManagementHandler>,
    repository: Arc<StubRepository>,
}

impl Api {
    fn new() -> Self {
        Self::with_remote(RemoteManagement {
            allow_remote: true,
            secret_key: Some(hash_secret(SECRET)),
        })
    }

    fn with_remote(remote: RemoteManagement) -> Self {
        let env = TestEnv::new();
        let config = load_config(&env.config_path()).unwrap();
        let state = Arc::new(ConfigState::new(false, 0));
        let repository = Arc::new(StubRepository::new());
        let scheduler = SyncScheduler::new(repository.clone()).with_config(state.clone());
        let auth = AuthGuard::new(AuthSettings::new(&remote, None, None));
        let handler = Arc::new(ManagementHandler::new(
            state,
            config,
            env.config_path(),
            Some(scheduler),
            auth,
        ));
        Self {
            env,
            handler,
            repository,
        }
    }

    fn app(&self, peer: [u8; 4]) -> Router {
        router(self.handler.clone()).layer(MockConnectInfo(SocketAddr::from((peer, 40000))))
    }

    async fn send(
        &self,
        peer: [u8; 4],
        method: Method,
        path: &str,
        key: Option<&str>,
        body: Option<&str>,
    ) -> (StatusCode, Value, axum::http::HeaderMap) {
        let mut request = Request::builder().method(method).uri(path);
        if let Some(key) = key {
            request = request.header("authorization", format!("Bearer {}", key));
        }
        let request = request
            .header("content-type", "application/json")
            .body(Body::from(body.unwrap_or("").to_string()))
            .unwrap();

        let response = self.app(peer).oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value, headers)
    }

    async fn local(&self, method: Method, path: &str, body: Option<&str>) -> (StatusCode, Value) {
        let (status, value, _) = self
            .send([127, 0, 0, 1], method, path, Some(SECRET), body)
            .await;
        (status, value)
    }
}

const REMOTE_PEER: [u8; 4] = [203, 0, 113, 9];

#[tokio::test]
async fn test_get_read_only_defaults_to_false() {
    let api = Api::new();

    let (status, body) = api.local(Method::GET, READ_ONLY, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "read_only": false }));
}

#[tokio::test]
async fn test_put_read_only_persists_both_files() {
    let api = Api::new();

    let (status, body) = api
        .local(Method::PUT, READ_ONLY, Some(r#"{"read_only": true}"#))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "read_only": true }));
    assert!(api.handler.get_read_only());
    assert!(load_config(&api.env.config_path()).unwrap().read_only_storage);
    assert_eq!(api.env.read_side_file()["read_only"], json!(true));
    assert!(api.handler.scheduler().unwrap().is_running());
}

#[tokio::test]
async fn test_patch_accepts_value_key() {
    let api = Api::new();
    api.local(Method::PUT, READ_ONLY, Some(r#"{"read_only": true}"#))
        .await;

    let (status, body) = api
        .local(Method::PATCH, READ_ONLY, Some(r#"{"value": false}"#))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "read_only": false }));
    assert!(!api.handler.scheduler().unwrap().is_running());
}

#[tokio::test]
async fn test_put_read_only_rejects_invalid_body() {
    let api = Api::new();

    for body in ["", "nonsense", r#"{"read_only": "yes"}"#, "{}"] {
        let (status, value) = api.local(Method::PUT, READ_ONLY, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body:?}");
        assert_eq!(value, json!({ "error": "invalid body" }));
    }
    assert!(!api.handler.get_read_only());
}

#[tokio::test]
async fn test_enable_refused_with_pending_changes() {
    let api = Api::new();
    api.repository.set_pending(true);

    let (status, body) = api
        .local(Method::PUT, READ_ONLY, Some(r#"{"read_only": true}"#))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Cannot enable read-only mode while there are pending local changes. Please sync changes first."
    );
    assert!(!api.handler.get_read_only());
    assert!(!api.env.side_file().exists());
}

#[tokio::test]
async fn test_disable_allowed_with_pending_changes() {
    let api = Api::new();
    api.local(Method::PUT, READ_ONLY, Some(r#"{"read_only": true}"#))
        .await;
    api.repository.set_pending(true);

    let (status, _) = api
        .local(Method::PUT, READ_ONLY, Some(r#"{"read_only": false}"#))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(!api.handler.get_read_only());
}

#[tokio::test]
async fn test_sync_interval_round_trip() {
    let api = Api::new();

    let (status, body) = api
        .local(
            Method::PUT,
            SYNC_INTERVAL,
            Some(r#"{"sync_interval_minutes": 15}"#),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "sync_interval_minutes": 15 }));

    let (_, body) = api.local(Method::GET, SYNC_INTERVAL, None).await;
    assert_eq!(body, json!({ "sync_interval_minutes": 15 }));
    assert_eq!(
        load_config(&api.env.config_path()).unwrap().sync_interval_minutes,
        Some(15)
    );
    assert_eq!(api.env.read_side_file()["sync_interval_minutes"], json!(15));
}

#[tokio::test]
async fn test_sync_interval_validation_messages() {
    let api = Api::new();

    let cases = [
        (
            r#"{"sync_interval_minutes": 0}"#,
            "sync_interval_minutes must be at least 1",
        ),
        (
            r#"{"sync_interval_minutes": 2.5}"#,
            "sync_interval_minutes must be a whole number",
        ),
        (r#"{"value": "ten"}"#, "value must be a number"),
        ("{}", "invalid body"),
    ];
    for (body, message) in cases {
        let (status, value) = api.local(Method::PATCH, SYNC_INTERVAL, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(value, json!({ "error": message }), "{body}");
    }
    assert_eq!(api.handler.get_sync_interval(), 0);
}

#[tokio::test]
async fn test_status_reports_scheduler() {
    let api = Api::new();

    let (status, body) = api.local(Method::GET, STATUS, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["read_only"], json!(false));
    assert_eq!(body["scheduler"], json!("stopped"));
    assert_eq!(body["last_sync"], Value::Null);

    api.local(Method::PUT, READ_ONLY, Some(r#"{"read_only": true}"#))
        .await;

    let mut synced = false;
    for _ in 0..100 {
        let (_, body) = api.local(Method::GET, STATUS, None).await;
        if body["last_sync"]["commit"].is_string() {
            assert_eq!(body["scheduler"], json!("running"));
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(synced);
    api.handler.scheduler().unwrap().stop();
}

#[tokio::test]
async fn test_version_headers_on_every_response() {
    let api = Api::new();

    let (_, _, ok) = api
        .send([127, 0, 0, 1], Method::GET, READ_ONLY, Some(SECRET), None)
        .await;
    let (status, _, refused) = api
        .send([127, 0, 0, 1], Method::GET, READ_ONLY, None, None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    for headers in [ok, refused] {
        assert_eq!(
            headers.get("x-ros-version").unwrap(),
            env!("CARGO_PKG_VERSION")
        );
        assert!(headers.contains_key("x-ros-commit"));
        assert!(headers.contains_key("x-ros-build-date"));
    }
}

#[tokio::test]
async fn test_management_key_header_accepted() {
    let api = Api::new();
    let request = Request::builder()
        .uri(READ_ONLY)
        .header("x-management-key", SECRET)
        .body(Body::empty())
        .unwrap();

    let response = api.app(REMOTE_PEER).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_remote_disabled_is_forbidden() {
    let api = Api::with_remote(RemoteManagement {
        allow_remote: false,
        secret_key: Some(hash_secret(SECRET)),
    });

    let (status, body, _) = api
        .send(REMOTE_PEER, Method::GET, READ_ONLY, Some(SECRET), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "remote management disabled" }));

    let (status, _, _) = api
        .send([127, 0, 0, 1], Method::GET, READ_ONLY, Some(SECRET), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_no_secret_configured_is_forbidden() {
    let api = Api::with_remote(RemoteManagement::default());

    let (status, body, _) = api
        .send([127, 0, 0, 1], Method::GET, READ_ONLY, Some(SECRET), None)
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "remote management key not set" }));
}

#[tokio::test]
async fn test_remote_caller_banned_after_five_failures() {
    let api = Api::new();

    for _ in 0..5 {
        let (status, body, _) = api
            .send(REMOTE_PEER, Method::GET, READ_ONLY, Some("wrong"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "invalid management key" }));
    }

    let (status, body, _) = api
        .send(REMOTE_PEER, Method::GET, READ_ONLY, Some(SECRET), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("IP banned due to too many failed attempts. Try again in ")
    );

    let (status, _, _) = api
        .send([127, 0, 0, 1], Method::GET, READ_ONLY, Some(SECRET), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_local_failures_never_ban() {
    let api = Api::new();

    for _ in 0..10 {
        let (status, _, _) = api
            .send([127, 0, 0, 1], Method::GET, READ_ONLY, Some("wrong"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _, _) = api
        .send([127, 0, 0, 1], Method::GET, READ_ONLY, Some(SECRET), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}
