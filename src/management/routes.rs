//! HTTP surface of the management control plane.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;

use super::auth::AuthError;
use super::body::{parse_bool_field, parse_int_field};
use super::{MIN_SYNC_INTERVAL_MINUTES, ManagementError, ManagementHandler, StorageStatus};

pub const READ_ONLY_PATH: &str = "/v0/management/storage/readonly";
pub const SYNC_INTERVAL_PATH: &str = "/v0/management/storage/sync-interval";
pub const STATUS_PATH: &str = "/v0/management/storage/status";

/// Build version reported on every management response.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("ROS_GIT_COMMIT");
pub const BUILD_DATE: &str = env!("ROS_BUILD_TIMESTAMP");

/// Build the management router.
///
/// Requests must reach it through a service that provides
/// `ConnectInfo<SocketAddr>` (`into_make_service_with_connect_info`).
pub fn router(handler: Arc<ManagementHandler>) -> Router {
    Router::new()
        .route(
            READ_ONLY_PATH,
            get(get_read_only).put(put_read_only).patch(put_read_only),
        )
        .route(
            SYNC_INTERVAL_PATH,
            get(get_sync_interval)
                .put(put_sync_interval)
                .patch(put_sync_interval),
        )
        .route(STATUS_PATH, get(get_status))
        .layer(middleware::from_fn_with_state(handler.clone(), authenticate))
        .layer(middleware::from_fn(version_headers))
        .with_state(handler)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = if self.is_forbidden() {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::UNAUTHORIZED
        };
        error_body(status, self.to_string())
    }
}

impl IntoResponse for ManagementError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match self {
            ManagementError::Persist {
                field,
                value,
                message,
            } => {
                let mut body = serde_json::Map::new();
                body.insert("error".to_string(), Value::String(message));
                body.insert(field.to_string(), value);
                (status, Json(Value::Object(body))).into_response()
            }
            other => error_body(status, other.to_string()),
        }
    }
}

/// Key from `Authorization: Bearer <key>` (or the raw header), else
/// `X-Management-Key`.
fn provided_key(headers: &HeaderMap) -> Option<String> {
    let from_authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(|value| match value.split_once(' ') {
            Some((scheme, key)) if scheme.eq_ignore_ascii_case("bearer") => key.to_string(),
            _ => value.to_string(),
        })
        .filter(|key| !key.is_empty());

    from_authorization.or_else(|| {
        headers
            .get("x-management-key")
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

async fn authenticate(
    State(handler): State<Arc<ManagementHandler>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let provided = provided_key(request.headers());
    match handler.auth().authorize(peer.ip(), provided.as_deref()) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "Management request refused");
            e.into_response()
        }
    }
}

async fn version_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in [
        ("x-ros-version", VERSION),
        ("x-ros-commit", COMMIT),
        ("x-ros-build-date", BUILD_DATE),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
    response
}

/// Run a blocking handler operation on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ManagementError>
where
    F: FnOnce() -> Result<T, ManagementError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ManagementError::Internal(format!("management task failed: {}", e)))?
}

async fn get_read_only(State(handler): State<Arc<ManagementHandler>>) -> Json<Value> {
    Json(json!({ "read_only": handler.get_read_only() }))
}

async fn put_read_only(
    State(handler): State<Arc<ManagementHandler>>,
    body: Bytes,
) -> Result<Json<Value>, ManagementError> {
    let value = parse_bool_field(&body, "read_only", "value").ok_or(ManagementError::InvalidBody)?;
    let value = blocking(move || handler.set_read_only(value)).await?;
    Ok(Json(json!({ "read_only": value })))
}

async fn get_sync_interval(State(handler): State<Arc<ManagementHandler>>) -> Json<Value> {
    Json(json!({ "sync_interval_minutes": handler.get_sync_interval() }))
}

async fn put_sync_interval(
    State(handler): State<Arc<ManagementHandler>>,
    body: Bytes,
) -> Result<Json<Value>, ManagementError> {
    let minutes = parse_int_field(
        &body,
        "sync_interval_minutes",
        "value",
        MIN_SYNC_INTERVAL_MINUTES,
    )
    .map_err(ManagementError::Validation)?
    .ok_or(ManagementError::InvalidBody)?;
    let minutes = blocking(move || handler.set_sync_interval(minutes)).await?;
    Ok(Json(json!({ "sync_interval_minutes": minutes })))
}

async fn get_status(State(handler): State<Arc<ManagementHandler>>) -> Json<StorageStatus> {
    Json(handler.status())
}
