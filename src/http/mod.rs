//! HTTP surface over a broadcaster
//!
//! Routes:
//! - `GET /` small viewer page
//! - `GET /frame.jpg` latest frame, `503` until the first publish
//! - `GET /meta.json` latest metadata, `{}` until the first publish
//! - `GET /stream.mjpg` multipart stream, one part per new frame
//!
//! Every streaming client holds its own broadcaster cursor, so a slow
//! client only ever skips frames and never delays the others.

pub mod multipart;

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Args;
use futures::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcaster;
use crate::error::{Error, Result};
use crate::stats::HttpStats;

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, max-age=0";

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>framebus</title></head>
<body style="margin:0;background:#111;color:#ddd;font-family:monospace">
<img src="/stream.mjpg" style="display:block;max-width:100%">
<pre id="meta"></pre>
<script>
setInterval(async () => {
  const r = await fetch('/meta.json', {cache: 'no-store'});
  document.getElementById('meta').textContent = JSON.stringify(await r.json(), null, 2);
}, 1000);
</script>
</body>
</html>
"#;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Listen address, `host:port`
    pub bind_addr: String,

    /// Content type of the published frames
    pub content_type: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            content_type: "image/jpeg".to_string(),
        }
    }
}

impl HttpConfig {
    /// Set the frame content type
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// HTTP options from the command line or the environment
#[derive(Debug, Clone, Args)]
pub struct HttpArgs {
    /// Host to listen on
    #[arg(long, env = "HTTP_HOST", default_value = "0.0.0.0")]
    pub http_host: String,

    /// Port to listen on
    #[arg(
        long,
        env = "HTTP_PORT",
        default_value_t = 8000,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub http_port: u16,

    /// Content type of the published frames
    #[arg(long, env = "FRAME_CONTENT_TYPE", default_value = "image/jpeg")]
    pub content_type: String,
}

impl From<HttpArgs> for HttpConfig {
    fn from(args: HttpArgs) -> Self {
        HttpConfig {
            bind_addr: format!("{}:{}", args.http_host, args.http_port),
            content_type: args.content_type,
        }
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    broadcaster: Arc<Broadcaster>,
    stats: Arc<HttpStats>,
    content_type: HeaderValue,
    shutdown: CancellationToken,
}

impl AppState {
    /// Build handler state; fails if the content type is not a valid header value
    pub fn new(broadcaster: Arc<Broadcaster>, config: &HttpConfig) -> Result<Self> {
        let content_type = HeaderValue::from_str(&config.content_type).map_err(|_| {
            Error::Config(format!("invalid content type {:?}", config.content_type))
        })?;

        Ok(Self {
            broadcaster,
            stats: Arc::new(HttpStats::new()),
            content_type,
            shutdown: CancellationToken::new(),
        })
    }

    /// HTTP metrics
    pub fn stats(&self) -> &Arc<HttpStats> {
        &self.stats
    }

    /// End open streams when `shutdown` is cancelled
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/frame.jpg", get(handle_frame))
        .route("/meta.json", get(handle_meta))
        .route("/stream.mjpg", get(handle_stream))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled
///
/// Streaming responses are ended on shutdown so the graceful drain can
/// complete.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "HTTP server listening");
    }

    let app = router(state.with_shutdown(shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

fn no_cache_headers(content_type: HeaderValue) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers
}

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn handle_frame(State(state): State<AppState>) -> Response {
    match state.broadcaster.snapshot() {
        Some(latest) => {
            state.stats.snapshots_served.inc();
            (no_cache_headers(state.content_type.clone()), latest.frame.clone()).into_response()
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, "No frame yet").into_response(),
    }
}

async fn handle_meta(State(state): State<AppState>) -> Response {
    let headers = [(header::CACHE_CONTROL, "no-store")];
    match state.broadcaster.snapshot() {
        Some(latest) => (headers, Json(latest.metadata.clone())).into_response(),
        None => (headers, Json(serde_json::json!({}))).into_response(),
    }
}

/// Keeps the streaming client gauge accurate however the body ends
struct StreamClient {
    stats: Arc<HttpStats>,
}

impl StreamClient {
    fn register(stats: Arc<HttpStats>) -> Self {
        stats.stream_clients.inc();
        tracing::debug!(clients = stats.stream_clients.get(), "Stream client connected");
        Self { stats }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.stats.stream_clients.dec();
        tracing::debug!(clients = self.stats.stream_clients.get(), "Stream client disconnected");
    }
}

async fn handle_stream(State(state): State<AppState>) -> Response {
    let cursor = state.broadcaster.subscribe();
    // The frame current at connect time is sent first so the client has
    // something to show before the next publish.
    let current = state
        .broadcaster
        .snapshot()
        .filter(|latest| latest.seq == cursor.last_seen());

    let client = StreamClient::register(Arc::clone(&state.stats));
    let content_type = state.content_type.to_str().unwrap_or("image/jpeg").to_string();

    let parts = stream::iter(current)
        .chain(cursor.into_stream())
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(move |latest| {
            client.stats.parts_sent.inc();
            Ok::<_, Infallible>(multipart::encode_part(&content_type, &latest.frame))
        });

    let mut headers = no_cache_headers(HeaderValue::from_static(multipart::STREAM_CONTENT_TYPE));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );

    (headers, Body::from_stream(parts)).into_response()
}
