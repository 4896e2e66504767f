//! HTTP transport: upload and raw-body scan routes, health probe,
//! version and metrics endpoints.

use std::io::Cursor;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, MatchedPath, Multipart, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clamgate_clamd::handle;
use clamgate_core::ScanError;
use futures_util::TryStreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::{build, executor, metrics, SharedState};

/// Headroom over the ceiling for multipart boundaries and part headers.
const MULTIPART_SLACK: usize = 64 * 1024;
/// Client-closed-request status popularized by nginx.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Build the HTTP router with all routes and middleware.
#[must_use]
pub fn router(state: SharedState) -> Router {
    let body_ceiling = usize::try_from(state.config.max_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_SLACK);
    Router::new()
        .route("/api/scan", post(scan_upload))
        .route("/api/stream-scan", post(scan_raw_body))
        .route("/api/health-check", get(health_check))
        .route("/api/version", get(version))
        .route("/metrics", get(metrics_text))
        .layer(middleware::from_fn(track_requests))
        .layer(DefaultBodyLimit::max(body_ceiling))
        .with_state(state)
}

/// Per-request metrics keyed by the matched route template, for
/// everything except the probe and scrape routes. Unmatched requests
/// carry no template and are not recorded; raw paths would hand the
/// registry an unbounded, caller-chosen label set.
async fn track_requests(req: Request, next: Next) -> Response {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string());
    let Some(path) = path else {
        return next.run(req).await;
    };
    if path == "/metrics" || path == "/api/health-check" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let started = Instant::now();
    let response = next.run(req).await;
    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// `POST /api/scan`: multipart upload, one file under the `file` field.
async fn scan_upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let ceiling = state.config.max_size;
    if declared_length(&headers)
        .is_some_and(|len| len > ceiling.saturating_add(MULTIPART_SLACK as u64))
    {
        warn!(max_allowed = ceiling, "scan rejected: declared length too large");
        return reject(StatusCode::PAYLOAD_TOO_LARGE, &too_large_message(ceiling));
    }

    // First part named `file` wins; unrelated parts are skipped.
    let field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => break field,
            Ok(Some(_)) => {}
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                warn!(max_allowed = ceiling, "scan rejected: body past the transport limit");
                return reject(StatusCode::PAYLOAD_TOO_LARGE, &too_large_message(ceiling));
            }
            Ok(None) | Err(_) => {
                warn!("scan rejected: no readable multipart file field");
                return reject(StatusCode::BAD_REQUEST, "Provide a single file");
            }
        }
    };
    let filename = field.file_name().map(str::to_owned).unwrap_or_default();
    let data = match field.bytes().await {
        Ok(data) => data,
        Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            warn!(
                filename = %filename,
                max_allowed = ceiling,
                "scan rejected: body past the transport limit"
            );
            return reject(StatusCode::PAYLOAD_TOO_LARGE, &too_large_message(ceiling));
        }
        Err(e) => {
            warn!(error = %e, "scan rejected: multipart read failed");
            return reject(StatusCode::BAD_REQUEST, "Provide a single file");
        }
    };
    if data.len() as u64 > ceiling {
        warn!(
            filename = %filename,
            file_size = data.len(),
            max_allowed = ceiling,
            "scan rejected: file too large"
        );
        return reject(StatusCode::PAYLOAD_TOO_LARGE, &too_large_message(ceiling));
    }

    debug!(filename = %filename, size = data.len(), "file received for scanning");
    respond_scan(&state, "http_scan", Cursor::new(data)).await
}

/// `POST /api/stream-scan`: raw body with a mandatory positive
/// `Content-Length`. The body is capped at the ceiling regardless of
/// what the header declared.
async fn scan_raw_body(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let ceiling = state.config.max_size;
    let Some(declared) = declared_length(&headers).filter(|len| *len > 0) else {
        warn!("stream scan rejected: missing or invalid Content-Length");
        return reject(
            StatusCode::BAD_REQUEST,
            "Content-Length header is required and must be greater than 0",
        );
    };
    if declared > ceiling {
        warn!(
            content_length = declared,
            max_allowed = ceiling,
            "stream scan rejected: file too large"
        );
        return reject(StatusCode::BAD_REQUEST, &too_large_message(ceiling));
    }

    debug!(content_length = declared, "stream scan started");
    let reader =
        StreamReader::new(body.into_data_stream().map_err(std::io::Error::other)).take(ceiling);
    respond_scan(&state, "http_stream_scan", reader).await
}

/// `GET /api/health-check`: one daemon ping.
async fn health_check(State(state): State<SharedState>) -> Response {
    match handle::ping(&state.config).await {
        Ok(()) => {
            metrics::set_health(true);
            debug!("health check passed");
            (StatusCode::OK, Json(serde_json::json!({ "message": "ok" }))).into_response()
        }
        Err(e) => {
            metrics::set_health(false);
            warn!(error = %e, "health check failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "message": "Clamd service unavailable" })),
            )
                .into_response()
        }
    }
}

/// `GET /api/version`: build-time metadata.
async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": build::VERSION,
        "commit": build::COMMIT,
        "build": build::BUILD_TIME,
    }))
}

/// `GET /metrics`: Prometheus text exposition.
async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

async fn respond_scan<R>(state: &SharedState, method: &'static str, source: R) -> Response
where
    R: AsyncRead + Send + Unpin + 'static,
{
    match executor::run_scan(state, method, source).await {
        Ok(outcome) => {
            info!(
                method,
                status = outcome.status_label(),
                result = %outcome.description,
                elapsed_seconds = outcome.elapsed_secs,
                "scan completed"
            );
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": outcome.category().as_str(),
                    "message": outcome.description,
                    "time": outcome.elapsed_secs,
                })),
            )
                .into_response()
        }
        Err(err) => {
            warn!(method, error = %err, "scan failed");
            scan_error_response(&err)
        }
    }
}

/// Mechanical `ScanError` to HTTP response mapping.
fn scan_error_response(err: &ScanError) -> Response {
    let status = match err {
        ScanError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ScanError::Canceled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        ScanError::Engine { .. } | ScanError::Unavailable(_) => StatusCode::BAD_GATEWAY,
        ScanError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
    };
    let message = match err {
        ScanError::Unavailable(_) => "Clamd service down".to_string(),
        other => other.to_string(),
    };
    (
        status,
        Json(serde_json::json!({
            "status": err.category().as_str(),
            "message": message,
        })),
    )
        .into_response()
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "message": message }))).into_response()
}

fn too_large_message(ceiling: u64) -> String {
    format!("File too large. Maximum size is {ceiling} bytes")
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
