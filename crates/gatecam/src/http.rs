//! HTTP API
//!
//! Two routers share one state:
//! - internal: unauthenticated, CORS-enabled, all camera endpoints plus the
//!   device proxy and `/health`
//! - external: the stream and device proxy only, behind Basic Auth keyed to
//!   each camera's or device's access secret

use crate::auth;
use crate::cache::{FrameError, ReadError, Snapshot};
use crate::camera::Camera;
use crate::config::ModeKind;
use crate::device::{Device, DeviceRegistry};
use crate::proxy::{DeviceProxy, ProxyError};
use crate::registry::{CameraRegistry, Registered};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Multipart boundary of the MJPEG stream
pub const BOUNDARY: &str = "frame";

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub cameras: Arc<CameraRegistry>,
    pub devices: Arc<DeviceRegistry>,
    pub proxy: Arc<DeviceProxy>,
}

/// Errors surfaced to HTTP clients
#[derive(Debug)]
pub enum ApiError {
    CameraNotFound(String),
    DeviceNotFound(String),
    Unauthorized,
    Read(ReadError),
    Proxy(ProxyError),
}

impl From<ReadError> for ApiError {
    fn from(err: ReadError) -> Self {
        ApiError::Read(err)
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        ApiError::Proxy(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::CameraNotFound(id) => {
                log::debug!("camera not found: {}", id);
                error_body(StatusCode::NOT_FOUND, format!("camera not found: {}", id))
            }
            ApiError::DeviceNotFound(id) => {
                log::debug!("device not found: {}", id);
                error_body(StatusCode::NOT_FOUND, format!("device not found: {}", id))
            }
            ApiError::Unauthorized => {
                let mut response = error_body(StatusCode::UNAUTHORIZED, "Unauthorized".into());
                if let Ok(value) = HeaderValue::from_str(&auth::challenge()) {
                    response
                        .headers_mut()
                        .insert(header::WWW_AUTHENTICATE, value);
                }
                response
            }
            ApiError::Read(ReadError::NotReady) => {
                error_body(StatusCode::SERVICE_UNAVAILABLE, "frame not ready".into())
            }
            ApiError::Read(err @ ReadError::UnknownMode(_)) => {
                error_body(StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::Read(ReadError::Failed(err)) => {
                error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Proxy(err) => {
                log::warn!("{}", err);
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({
                        "error": "Failed to reach device",
                        "details": err.to_string(),
                    })),
                )
                    .into_response()
            }
        }
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl AppState {
    fn camera(&self, id: &str) -> Result<Arc<Camera>, ApiError> {
        self.cameras
            .get(id)
            .ok_or_else(|| ApiError::CameraNotFound(id.to_string()))
    }

    fn device(&self, id: &str) -> Result<Arc<Device>, ApiError> {
        self.devices
            .get(id)
            .ok_or_else(|| ApiError::DeviceNotFound(id.to_string()))
    }
}

fn authorize(headers: &HeaderMap, name: &str, secret: Option<String>) -> Result<(), ApiError> {
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if auth::validate_basic(header_value, name, secret.as_deref()) {
        Ok(())
    } else {
        log::debug!("rejected credentials for '{}'", name);
        Err(ApiError::Unauthorized)
    }
}

/// GET /health - Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// One multipart part carrying a JPEG frame
fn multipart_part(jpeg: &[u8]) -> Bytes {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(head.len() + jpeg.len() + 2);
    part.put_slice(head.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Emit a part for the current frame and then one per slot update. Ends when
/// the slot reports an error or the camera goes away.
fn mjpeg_body(rx: watch::Receiver<Snapshot>, camera: String) -> Body {
    let parts = futures::stream::unfold((rx, true), move |(mut rx, mut first)| {
        let camera = camera.clone();
        async move {
            loop {
                if !first && rx.changed().await.is_err() {
                    return None;
                }
                first = false;
                let snapshot = rx.borrow_and_update().clone();
                match snapshot {
                    Snapshot::Frame(jpeg) => {
                        return Some((Ok::<_, Infallible>(multipart_part(&jpeg)), (rx, false)))
                    }
                    Snapshot::NotReady => continue,
                    Snapshot::Failed(FrameError::Stopped) => return None,
                    Snapshot::Failed(err) => {
                        log::debug!("[{}] ending stream: {}", camera, err);
                        return None;
                    }
                }
            }
        }
    });
    Body::from_stream(parts)
}

fn stream_response(camera: &Camera) -> Result<Response, ApiError> {
    let rx = camera
        .subscribe(ModeKind::JpegStream)
        .ok_or(ReadError::UnknownMode(ModeKind::JpegStream))?;
    log::debug!("[{}] stream client connected", camera.name());
    let content_type = format!("multipart/x-mixed-replace; boundary={}", BOUNDARY);
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        mjpeg_body(rx, camera.name().to_string()),
    )
        .into_response())
}

fn raw_frame_response(camera: &Camera, mode: ModeKind) -> Result<Response, ApiError> {
    let frame = camera.read_frame(mode)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
            (header::CONNECTION, "keep-alive"),
        ],
        frame,
    )
        .into_response())
}

/// Upstream path for a proxied request, query string included
fn upstream_endpoint(endpoint: &str, uri: &Uri) -> String {
    match uri.query() {
        Some(query) => format!("/{}?{}", endpoint, query),
        None => format!("/{}", endpoint),
    }
}

async fn relay(
    state: &AppState,
    device: &Device,
    method: Method,
    headers: &HeaderMap,
    endpoint: &str,
    uri: &Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let upstream = state
        .proxy
        .forward(device, method, headers, body, &upstream_endpoint(endpoint, uri))
        .await?;
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    Ok(response)
}

/// GET /api/v1/camera/{id}/stream
async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let camera = state.camera(&id)?;
    stream_response(&camera)
}

/// GET /api/v1/camera/{id}/raw_grayscale_frame
async fn raw_grayscale_frame(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let camera = state.camera(&id)?;
    raw_frame_response(&camera, ModeKind::GrayscaleFrame)
}

/// GET /api/v1/camera/{id}/raw_color_frame
async fn raw_color_frame(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let camera = state.camera(&id)?;
    raw_frame_response(&camera, ModeKind::ColorFrame)
}

/// ANY /api/v1/device/{id}/{*endpoint}
async fn device_proxy(
    State(state): State<AppState>,
    Path((id, endpoint)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let device = state.device(&id)?;
    relay(&state, &device, method, &headers, &endpoint, &uri, body).await
}

/// ANY /api/v1/device/{id}/ - the device's root path
async fn device_proxy_root(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let device = state.device(&id)?;
    relay(&state, &device, method, &headers, "", &uri, body).await
}

/// GET /api/v1/camera/{id}/stream (Basic Auth)
async fn authed_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let camera = state.camera(&id)?;
    authorize(&headers, camera.name(), camera.access_key())?;
    stream_response(&camera)
}

/// ANY /api/v1/device/{id}/{*endpoint} (Basic Auth)
async fn authed_device_proxy(
    State(state): State<AppState>,
    Path((id, endpoint)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let device = state.device(&id)?;
    authorize(&headers, device.name(), device.access_key())?;
    relay(&state, &device, method, &headers, &endpoint, &uri, body).await
}

/// ANY /api/v1/device/{id}/ (Basic Auth)
async fn authed_device_proxy_root(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let device = state.device(&id)?;
    authorize(&headers, device.name(), device.access_key())?;
    relay(&state, &device, method, &headers, "", &uri, body).await
}

/// Request details for proxied calls
async fn log_request(request: Request, next: Next) -> Response {
    log::debug!(
        "{} {} from {:?}",
        request.method(),
        request.uri(),
        request.headers().get(header::USER_AGENT)
    );
    for (name, value) in request.headers() {
        if name != header::AUTHORIZATION {
            log::debug!("  {}: {:?}", name, value);
        }
    }
    next.run(request).await
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Router for the internal (unauthenticated) server
pub fn internal_router(state: AppState, cors_origins: &[String]) -> Router {
    let devices = Router::new()
        .route("/api/v1/device/{id}", any(device_proxy_root))
        .route("/api/v1/device/{id}/", any(device_proxy_root))
        .route("/api/v1/device/{id}/{*endpoint}", any(device_proxy))
        .layer(middleware::from_fn(log_request));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/camera/{id}/stream", get(stream))
        .route(
            "/api/v1/camera/{id}/raw_grayscale_frame",
            get(raw_grayscale_frame),
        )
        .route("/api/v1/camera/{id}/raw_color_frame", get(raw_color_frame))
        .merge(devices)
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// Router for the externally-exposed server
pub fn external_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/camera/{id}/stream", get(authed_stream))
        .route("/api/v1/device/{id}", any(authed_device_proxy_root))
        .route("/api/v1/device/{id}/", any(authed_device_proxy_root))
        .route(
            "/api/v1/device/{id}/{*endpoint}",
            any(authed_device_proxy),
        )
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSlot;

    #[test]
    fn test_multipart_part_layout() {
        let part = multipart_part(b"JPEG");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
        );
    }

    #[test]
    fn test_upstream_endpoint() {
        let uri: Uri = "/api/v1/device/gate/open?delay=5".parse().unwrap();
        assert_eq!(upstream_endpoint("open", &uri), "/open?delay=5");
        let uri: Uri = "/api/v1/device/gate/a/b".parse().unwrap();
        assert_eq!(upstream_endpoint("a/b", &uri), "/a/b");
        let uri: Uri = "/api/v1/device/gate/?x=1".parse().unwrap();
        assert_eq!(upstream_endpoint("", &uri), "/?x=1");
    }

    #[test]
    fn test_error_statuses() {
        let cases = [
            (ApiError::CameraNotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ApiError::Read(ReadError::NotReady), StatusCode::SERVICE_UNAVAILABLE),
            (
                ApiError::Read(ReadError::Failed(FrameError::Stopped)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            "Basic realm=\"Restricted\""
        );
    }

    #[tokio::test]
    async fn test_mjpeg_body_ends_when_sealed() {
        use futures::StreamExt;

        let slot = CacheSlot::new();
        slot.write(Ok(Bytes::from_static(b"A")));
        let mut parts = mjpeg_body(slot.subscribe(), "gate".into()).into_data_stream();

        let first = parts.next().await.unwrap().unwrap();
        assert_eq!(first, multipart_part(b"A"));

        slot.write(Ok(Bytes::from_static(b"BB")));
        let second = parts.next().await.unwrap().unwrap();
        assert_eq!(second, multipart_part(b"BB"));

        slot.seal();
        assert!(parts.next().await.is_none());
    }
}
