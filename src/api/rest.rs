//! REST API Handlers
//!
//! Exposes the volume-driver contract over HTTP: volume CRUD, attach and
//! detach by initiator, and instance inspection.

use crate::domain::ports::{
    InstanceId, StorageDriverRef, Volume, VolumeAttachOpts, VolumeCreateOpts, VolumeDetachOpts,
    VolumeInspectOpts, VolumesOpts,
};
use crate::error::{Error, ErrorKind};
use crate::metrics::DriverMetrics;
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Volume creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeRequest {
    pub name: String,
    /// Capacity in GB
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default, rename = "type")]
    pub volume_type: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
}

/// Attach/detach request naming the host initiator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatorRequest {
    pub initiator: String,
    #[serde(default)]
    pub force: bool,
}

/// Attach response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachVolumeResponse {
    pub volume: Volume,
    /// Token the executor uses to find the local device
    pub token: String,
}

/// Attachment flag on read endpoints
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AttachmentsQuery {
    #[serde(default)]
    pub attachments: bool,
}

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub driver: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiErrorResponse {
    /// HTTP status and body for a driver error
    pub fn from_error(err: &Error) -> (StatusCode, Self) {
        let (status, code) = match err.kind() {
            ErrorKind::Configuration => (StatusCode::BAD_REQUEST, "invalid_request"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
            ErrorKind::Unsupported => (StatusCode::NOT_IMPLEMENTED, "unsupported"),
            ErrorKind::Failure => (StatusCode::BAD_GATEWAY, "array_error"),
        };
        (
            status,
            Self {
                error: code.into(),
                message: err.to_string(),
                details: None,
            },
        )
    }
}

fn error_response(err: Error) -> Response {
    let (status, body) = ApiErrorResponse::from_error(&err);
    if status.is_server_error() {
        warn!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    (status, Json(body)).into_response()
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    driver: StorageDriverRef,
    metrics: Arc<DriverMetrics>,
}

impl RestRouter {
    pub fn new(driver: StorageDriverRef, metrics: Arc<DriverMetrics>) -> Self {
        Self { driver, metrics }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            driver: self.driver,
            metrics: self.metrics,
        };

        Router::new()
            // Volume endpoints
            .route("/v1/volumes", get(list_volumes).post(create_volume))
            .route("/v1/volumes/:id", get(get_volume).delete(remove_volume))
            .route("/v1/volumes/:id/attach", post(attach_volume))
            .route("/v1/volumes/:id/detach", post(detach_volume))
            // Instance endpoints
            .route("/v1/instances/inspect", post(inspect_instance))
            // Health endpoint
            .route("/health", get(health_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    driver: StorageDriverRef,
    metrics: Arc<DriverMetrics>,
}

impl AppState {
    fn instance(&self, initiator: String) -> InstanceId {
        InstanceId::new(initiator, self.driver.name())
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_volumes(
    State(state): State<AppState>,
    Query(query): Query<AttachmentsQuery>,
) -> impl IntoResponse {
    let opts = VolumesOpts {
        attachments: query.attachments,
    };
    match state.driver.volumes(opts).await {
        Ok(volumes) => (StatusCode::OK, Json(volumes)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn create_volume(
    State(state): State<AppState>,
    Json(request): Json<CreateVolumeRequest>,
) -> impl IntoResponse {
    info!("Creating volume: {}", request.name);

    let opts = VolumeCreateOpts {
        size: request.size,
        volume_type: request.volume_type,
        availability_zone: request.availability_zone,
    };
    match state.driver.volume_create(&request.name, opts).await {
        Ok(volume) => (StatusCode::CREATED, Json(volume)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AttachmentsQuery>,
) -> impl IntoResponse {
    let opts = VolumeInspectOpts {
        attachments: query.attachments,
    };
    match state.driver.volume_inspect(&id, opts).await {
        Ok(volume) => (StatusCode::OK, Json(volume)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn remove_volume(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    info!("Removing volume: {}", id);
    match state.driver.volume_remove(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn attach_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<InitiatorRequest>,
) -> impl IntoResponse {
    info!(volume = %id, initiator = %request.initiator, "Attaching volume");

    let opts = VolumeAttachOpts {
        instance_id: state.instance(request.initiator),
        force: request.force,
    };
    match state.driver.volume_attach(&id, opts).await {
        Ok((volume, token)) => {
            (StatusCode::OK, Json(AttachVolumeResponse { volume, token })).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn detach_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<InitiatorRequest>,
) -> impl IntoResponse {
    info!(volume = %id, initiator = %request.initiator, "Detaching volume");

    let opts = VolumeDetachOpts {
        instance_id: state.instance(request.initiator),
        force: request.force,
    };
    match state.driver.volume_detach(&id, opts).await {
        Ok(volume) => (StatusCode::OK, Json(volume)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn inspect_instance(
    State(state): State<AppState>,
    Json(request): Json<InitiatorRequest>,
) -> impl IntoResponse {
    let instance_id = state.instance(request.initiator);
    match state.driver.instance_inspect(&instance_id).await {
        Ok(instance) => (StatusCode::OK, Json(instance)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".into(),
        driver: state.driver.name().to_string(),
        version: crate::VERSION.into(),
        timestamp: Utc::now(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, state.metrics.content_type())],
            buffer,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::InMemoryArray;
    use crate::config::DriverConfig;
    use crate::driver::VmaxDriver;
    use crate::metrics::InstrumentedDriver;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SYMM: &str = "000197900123";
    const INITIATOR: &str = "iqn.1994-05.com.redhat:a1b2c3";

    fn router() -> Router {
        let mut config = DriverConfig::new("https://u4p.lab.local", SYMM);
        config.port_group = Some("libStorage_PG".into());
        let array = InMemoryArray::new(SYMM).with_port_group("libStorage_PG");
        let inner: StorageDriverRef = Arc::new(VmaxDriver::new(config, Arc::new(array)));
        let metrics = Arc::new(DriverMetrics::new().unwrap());
        let driver: StorageDriverRef = Arc::new(InstrumentedDriver::new(inner, metrics.clone()));
        RestRouter::new(driver, metrics).build()
    }

    async fn scrape(app: &Router) -> String {
        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = vec![
            (Error::Configuration("bad".into()), StatusCode::BAD_REQUEST),
            (Error::not_found("Volume", "1"), StatusCode::NOT_FOUND),
            (
                Error::Conflict {
                    kind: "Host".into(),
                    name: "h".into(),
                    reason: "initiator mismatch".into(),
                },
                StatusCode::CONFLICT,
            ),
            (Error::unsupported("volume_copy"), StatusCode::NOT_IMPLEMENTED),
            (Error::Internal("boom".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiErrorResponse::from_error(&err).0, expected);
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = router();
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["driver"], "vmax");
    }

    #[tokio::test]
    async fn test_volume_attach_detach_over_http() {
        let app = router();

        let (status, created) = call(
            &app,
            Method::POST,
            "/v1/volumes",
            Some(json!({"name": "data01", "size": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, attached) = call(
            &app,
            Method::POST,
            &format!("/v1/volumes/{}/attach", id),
            Some(json!({"initiator": INITIATOR})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(attached["token"], id.as_str());

        let (_, inspected) = call(
            &app,
            Method::GET,
            &format!("/v1/volumes/{}?attachments=true", id),
            None,
        )
        .await;
        assert_eq!(inspected["attachments"].as_array().unwrap().len(), 1);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/v1/volumes/{}/detach", id),
            Some(json!({"initiator": INITIATOR})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, Method::DELETE, &format!("/v1/volumes/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&app, Method::GET, &format!("/v1/volumes/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_metrics_after_attach() {
        let app = router();
        let (_, created) = call(
            &app,
            Method::POST,
            "/v1/volumes",
            Some(json!({"name": "data01", "size": 1})),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();
        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/v1/volumes/{}/attach", id),
            Some(json!({"initiator": INITIATOR})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let text = scrape(&app).await;
        assert!(text.contains(
            "vmax_driver_operations_total{operation=\"attach\",outcome=\"success\"} 1"
        ));
        assert!(text.contains(
            "vmax_driver_operations_total{operation=\"create\",outcome=\"success\"} 1"
        ));
        assert!(text.contains("vmax_driver_attach_duration_seconds_count 1"));
    }

    #[tokio::test]
    async fn test_create_without_size_is_bad_request() {
        let app = router();
        let (status, body) =
            call(&app, Method::POST, "/v1/volumes", Some(json!({"name": "data01"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_inspect_instance_without_host() {
        let app = router();
        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/instances/inspect",
            Some(json!({"initiator": INITIATOR})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["region"], SYMM);
        assert!(body.get("name").is_none());
    }
}
