use crate::config::CorsConfig;
use crate::feed::{Feed, FeedSink, SinkClosed};
use crate::metrics::Metrics;
use crate::snapshot::SnapshotBuilder;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{routing::get, Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, error, info};

/// Body of every failed `/api/sistema` response. Carries no internal detail.
const SNAPSHOT_ERROR: &str = "Error al obtener datos";

const INDEX_HTML: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>sysfeed</title></head>
  <body>
    <p>Datos del sistema en <a href="/api/sistema">/api/sistema</a>.</p>
  </body>
</html>
"#;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub builder: SnapshotBuilder,
    pub feed: Feed,
    pub shutdown: watch::Receiver<bool>,
}

pub fn build_router(state: HttpAppState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/sistema", get(snapshot_handler))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .layer(cors_layer(cors))
        .with_state(state)
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origin = if cors.allows_any_origin() {
        AllowOrigin::any()
    } else {
        // Already checked by Config::validate.
        AllowOrigin::list(
            cors.allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn snapshot_handler(State(state): State<HttpAppState>) -> Response {
    let started = Instant::now();
    match state.builder.build().await {
        Ok(snapshot) => {
            state.metrics.observe_build("api", started.elapsed(), true);
            Json(snapshot).into_response()
        }
        Err(err) => {
            state.metrics.observe_build("api", started.elapsed(), false);
            error!(error = %err, "failed to build snapshot for /api/sistema");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": SNAPSHOT_ERROR })),
            )
                .into_response()
        }
    }
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<HttpAppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

#[async_trait]
impl FeedSink for SplitSink<WebSocket, Message> {
    async fn push(&mut self, frame: String) -> Result<(), SinkClosed> {
        self.send(Message::Text(frame)).await.map_err(|_| SinkClosed)
    }
}

/// Runs one live-feed session until the client leaves, the feed stops
/// writing, or the service shuts down.
async fn serve_socket(socket: WebSocket, state: HttpAppState) {
    let (sink, mut stream) = socket.split();
    let mut subscriber = state.feed.subscribe(sink);
    let id = subscriber.id();
    let mut shutdown = state.shutdown.clone();
    info!(subscriber = id, "live feed subscriber connected");

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(subscriber = id, error = %err, "live feed receive error");
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = subscriber.finished() => break,
            _ = shutdown.changed() => break,
        }
    }

    subscriber.disconnect();
    info!(subscriber = id, "live feed subscriber disconnected");
}
