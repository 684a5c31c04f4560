//! HTTP API.
//!
//! Thin JSON layer over the [`Scanner`] and the [`RemediationDispatcher`],
//! consumed by the dashboard.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/alerts?offset=&limit=` | Alerts of the current cycle (`page=` also accepted) |
//! | `POST` | `/api/rescan` | Run a scan and return its report |
//! | `GET`  | `/api/status` | Running flag, alert count and last report |
//! | `GET`  | `/api/documents` | Document listing straight from the workspace |
//! | `GET`  | `/api/documents/{doc_id}` | One document |
//! | `POST` | `/api/remediate/{doc_id}` | Apply a remediation action |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "conflict", "message": "a scan is already running" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `upstream_error` (502).
//!
//! Remediation outcomes, including failed ones, are returned with status 200
//! as `{ "success": bool, "message": "..." }`.
//!
//! # Background scanning
//!
//! [`run_server`] runs an initial scan when `scan.scan_on_startup` is set and
//! then rescans every `scan.interval_secs` if configured. On Ctrl-C the
//! running scan is cancelled and the server drains in-flight requests.

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::client::ClientError;
use crate::config::Config;
use crate::models::{Alert, Document, RemediationOutcome};
use crate::remediate::{RemediationAction, RemediationDispatcher};
use crate::scan::{ScanReport, ScanTrigger, Scanner};

/// Page size used when `limit` is omitted.
pub const DEFAULT_ALERT_LIMIT: usize = 50;
const MAX_ALERT_LIMIT: usize = 1000;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    scanner: Arc<Scanner>,
    dispatcher: Arc<RemediationDispatcher>,
}

/// Build the API router without binding it.
pub fn router(scanner: Arc<Scanner>, dispatcher: Arc<RemediationDispatcher>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/alerts", get(handle_list_alerts))
        .route("/api/rescan", post(handle_rescan))
        .route("/api/status", get(handle_status))
        .route("/api/documents", get(handle_list_documents))
        .route("/api/documents/{doc_id}", get(handle_get_document))
        .route("/api/remediate/{doc_id}", post(handle_remediate))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState {
            scanner,
            dispatcher,
        })
}

/// Starts the HTTP server and the background scan loop.
///
/// Binds to `[server].bind` and runs until Ctrl-C.
pub async fn run_server(
    config: &Config,
    scanner: Arc<Scanner>,
    dispatcher: Arc<RemediationDispatcher>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", bind_addr, e))?;

    let stop = CancellationToken::new();
    let background = tokio::spawn(scan_loop(
        Arc::clone(&scanner),
        config.scan.scan_on_startup,
        config.scan.interval_secs,
        stop.clone(),
    ));

    let app = router(Arc::clone(&scanner), dispatcher);
    tracing::info!("sentinel listening on http://{}", bind_addr);

    let shutdown_scanner = Arc::clone(&scanner);
    let shutdown_stop = stop.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            shutdown_stop.cancel();
            shutdown_scanner.shutdown();
        })
        .await?;

    stop.cancel();
    let _ = background.await;
    Ok(())
}

/// Initial scan, then periodic rescans until `stop` fires.
async fn scan_loop(
    scanner: Arc<Scanner>,
    scan_on_startup: bool,
    interval_secs: Option<u64>,
    stop: CancellationToken,
) {
    if scan_on_startup {
        tracing::info!("running initial scan");
        scanner.trigger_scan().await;
    }

    let Some(secs) = interval_secs else {
        return;
    };

    let period = Duration::from_secs(secs);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let ScanTrigger::AlreadyRunning = scanner.trigger_scan().await {
                    tracing::debug!("scheduled scan skipped; a scan is already running");
                }
            }
        }
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal_error".to_string(),
        message: message.into(),
    }
}

/// Constructs a 502 error for failed workspace calls.
fn upstream_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_error".to_string(),
        message: message.into(),
    }
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(what) => not_found(format!("{} not found", what)),
            other => {
                tracing::error!(error = %other, "workspace request failed");
                upstream_error(other.to_string())
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/alerts ============

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    offset: Option<usize>,
    /// 1-based page number, used when `offset` is absent.
    page: Option<usize>,
    limit: Option<usize>,
}

impl AlertsQuery {
    fn window(&self) -> Result<(usize, usize), AppError> {
        let limit = self.limit.unwrap_or(DEFAULT_ALERT_LIMIT);
        if limit == 0 || limit > MAX_ALERT_LIMIT {
            return Err(bad_request(format!(
                "limit must be between 1 and {}",
                MAX_ALERT_LIMIT
            )));
        }
        let offset = match (self.offset, self.page) {
            (Some(offset), _) => offset,
            (None, Some(0)) => return Err(bad_request("page starts at 1")),
            (None, Some(page)) => (page - 1).saturating_mul(limit),
            (None, None) => 0,
        };
        Ok((offset, limit))
    }
}

async fn handle_list_alerts(
    State(state): State<AppState>,
    query: Result<Query<AlertsQuery>, QueryRejection>,
) -> Result<Json<Vec<Alert>>, AppError> {
    let Query(query) = query.map_err(|e| bad_request(e.body_text()))?;
    let (offset, limit) = query.window()?;
    Ok(Json(state.scanner.list_alerts(offset, limit)))
}

// ============ POST /api/rescan ============

#[derive(Serialize)]
struct RescanResponse {
    message: String,
    report: ScanReport,
}

/// The cycle runs on its own task so a client hanging up mid-scan cannot
/// drop it halfway through with the store already cleared.
async fn handle_rescan(State(state): State<AppState>) -> Result<Json<RescanResponse>, AppError> {
    let scanner = Arc::clone(&state.scanner);
    let scan = tokio::spawn(async move { scanner.trigger_scan().await });
    let trigger = scan.await.map_err(|e| {
        tracing::error!(error = %e, "scan task failed");
        internal_error("scan task failed")
    })?;

    match trigger {
        ScanTrigger::Completed(report) => Ok(Json(RescanResponse {
            message: "Scan complete".to_string(),
            report,
        })),
        ScanTrigger::AlreadyRunning => Err(conflict("a scan is already running")),
    }
}

// ============ GET /api/status ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    running: bool,
    alerts: usize,
    last_scan: Option<ScanReport>,
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: state.scanner.is_running(),
        alerts: state.scanner.store().len(),
        last_scan: state.scanner.last_report(),
    })
}

// ============ /api/documents ============

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<Document>>, AppError> {
    let documents = state.scanner.client().list_documents().await?;
    Ok(Json(documents))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<Document>, AppError> {
    let document = state
        .scanner
        .client()
        .get_document(&doc_id)
        .await
        .map_err(|e| match e {
            ClientError::NotFound(_) => not_found(format!("document {} not found", doc_id)),
            other => AppError::from(other),
        })?;
    Ok(Json(document))
}

// ============ POST /api/remediate/{doc_id} ============

#[derive(Debug, Default, Deserialize)]
struct RemediateRequest {
    #[serde(default)]
    action: RemediationAction,
}

/// The body is optional; an empty body deletes the document.
async fn handle_remediate(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    body: Bytes,
) -> Result<Json<RemediationOutcome>, AppError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RemediateRequest::default()
    } else {
        serde_json::from_slice::<RemediateRequest>(&body)
            .map_err(|e| bad_request(format!("invalid remediation request: {}", e)))?
    };

    let outcome = state.dispatcher.remediate(&doc_id, request.action).await;
    Ok(Json(outcome))
}
