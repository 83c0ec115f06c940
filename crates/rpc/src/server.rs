use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use fileswap_core::{Fileswap, SwapError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Shared state for the download server.
#[derive(Clone)]
pub struct AppState {
    pub swap: Fileswap,
    pub start_time: Instant,
    pub req_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(swap: Fileswap) -> Self {
        Self {
            swap,
            start_time: Instant::now(),
            req_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn record_request(&self) -> u64 {
        self.req_count.fetch_add(1, Ordering::Relaxed) as u64 + 1
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    req_total: u64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

/// Map a swap failure to its HTTP shape. Invalid requests keep their
/// user-safe message; everything else becomes an opaque 500 so internals
/// (paths, cipher details) never reach the remote caller.
fn into_api_error(err: SwapError) -> ApiError {
    if err.is_invalid_request() {
        ApiError::bad_request(err.to_string())
    } else {
        warn!("download request failed: {err}");
        ApiError::internal("internal server error")
    }
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    token: String,
}

pub async fn start_server(state: AppState, addr: &str) -> Result<()> {
    let shared = Arc::new(state);
    let app = build_router(shared);
    let listener = bind_listener(addr).await?;
    axum::serve(listener, app)
        .await
        .context("download server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind download listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind download listener on {addr}"))
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/download", get(handle_download))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let req_total = state.record_request();
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.uptime_seconds(),
        req_total,
    })
}

/// Forwards encrypted chunks from the blocking decrypt task to the
/// response body. A send failure means the client went away; surfacing it
/// as an I/O error makes the decrypt copy stop early.
struct ChannelWriter {
    tx: mpsc::Sender<Result<Vec<u8>, io::Error>>,
}

impl io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Ok(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "download client went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// GET /download?token=...
///
/// Verifies the token, claims the backing temp file (which also removes
/// it, enforcing single redemption) and streams the decrypted content as
/// an attachment. Invalid, expired or already-consumed tokens yield a 400;
/// faults on the server side yield an opaque 500. Once streaming has
/// begun, a decryption failure terminates the body early — the backing
/// file is gone either way.
async fn handle_download(
    State(state): State<SharedState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    state.record_request();

    let swap = state.swap.clone();
    let redemption = tokio::task::spawn_blocking(move || swap.redeem(&query.token))
        .await
        .map_err(|err| {
            warn!("redeem task panicked: {err}");
            ApiError::internal("internal server error")
        })?
        .map_err(into_api_error)?;

    let file_name = sanitize_file_name(redemption.file_name());
    let disposition = format!("attachment; filename=\"{file_name}\"");

    let (tx, rx) = mpsc::channel::<Result<Vec<u8>, io::Error>>(8);
    tokio::task::spawn_blocking(move || {
        let mut writer = ChannelWriter { tx: tx.clone() };
        match redemption.copy_to(&mut writer) {
            Ok(bytes) => debug!(bytes, "download streamed"),
            Err(err) => {
                warn!("download aborted mid-stream: {err}");
                let _ = tx.blocking_send(Err(io::Error::new(
                    io::ErrorKind::Other,
                    "download stream failed",
                )));
            }
        }
    });

    let body = Body::from_stream(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }));

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        )
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(body)
        .map_err(|err| {
            warn!("failed to build download response: {err}");
            ApiError::internal("internal server error")
        })
}

/// Keep the display filename header-safe: quotes, backslashes and control
/// characters would otherwise corrupt the Content-Disposition value.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_control() || c == '"' || c == '\\' {
                '_'
            } else {
                c
            }
        })
        .collect()
}
