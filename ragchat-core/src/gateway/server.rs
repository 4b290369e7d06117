//! Chat gateway server built on axum.

use super::connection::PageRegistry;
use super::events::{ClientMessage, ServerMessage};
use super::session::run_session;
use crate::backend::{fetch_model_listing, ModelListing, RagBackend};
use crate::config::ServerConfig;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const INDEX_HTML: &str = include_str!("../../assets/index.html");

const INBOX_CAPACITY: usize = 32;
const OUTBOX_CAPACITY: usize = 256;

/// Thread-safe shared gateway reference for axum handlers.
pub type SharedGateway = Arc<Mutex<GatewayServer>>;

/// The chat gateway: page, WebSocket and REST routes over one backend.
pub struct GatewayServer {
    config: ServerConfig,
    backend: Arc<dyn RagBackend>,
    pages: PageRegistry,
    started_at: chrono::DateTime<Utc>,
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("config", &self.config)
            .field("backend", &self.backend.describe())
            .field("pages", &self.pages.open_pages())
            .finish()
    }
}

impl GatewayServer {
    pub fn new(config: ServerConfig, backend: Arc<dyn RagBackend>) -> Self {
        Self {
            config,
            backend,
            pages: PageRegistry::new(),
            started_at: Utc::now(),
        }
    }

    /// Wrap into a [`SharedGateway`].
    pub fn shared(self) -> SharedGateway {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn backend(&self) -> Arc<dyn RagBackend> {
        Arc::clone(&self.backend)
    }

    pub fn pages_mut(&mut self) -> &mut PageRegistry {
        &mut self.pages
    }

    pub fn pages(&self) -> &PageRegistry {
        &self.pages
    }

    /// Uptime in seconds since the server was created.
    pub fn uptime_secs(&self) -> u64 {
        let elapsed = Utc::now() - self.started_at;
        elapsed.num_seconds().max(0) as u64
    }

    /// Number of active connections.
    pub fn active_connections(&self) -> usize {
        self.pages.open_pages()
    }

    /// The chat page with the configured title filled in.
    pub fn render_index(&self) -> String {
        INDEX_HTML.replace("{{title}}", &escape_html(&self.config.title))
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Build the gateway router: `/`, `/ws`, `/api/models` and `/health`.
pub fn router(shared: SharedGateway) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/models", get(models_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

async fn index_handler(State(gw): State<SharedGateway>) -> Html<String> {
    Html(gw.lock().await.render_index())
}

async fn ws_handler(ws: WebSocketUpgrade, State(gw): State<SharedGateway>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gw))
}

/// Current model listing, fetched fresh from the backend.
async fn models_handler(State(gw): State<SharedGateway>) -> impl IntoResponse {
    let backend = gw.lock().await.backend();
    let body = match fetch_model_listing(backend.as_ref()).await {
        listing @ ModelListing::Available(_) => serde_json::json!({
            "status": "available",
            "options": listing.options(),
            "selected": listing.default_model(),
        }),
        ModelListing::Unavailable { reason } => serde_json::json!({
            "status": "unavailable",
            "reason": reason,
        }),
    };
    Json(body)
}

async fn health_handler(State(gw): State<SharedGateway>) -> impl IntoResponse {
    let gw = gw.lock().await;
    Json(serde_json::json!({
        "status": "ok",
        "backend": gw.backend.describe(),
        "connections": gw.active_connections(),
        "submissions": gw.pages().submissions(),
        "uptime_secs": gw.uptime_secs(),
    }))
}

/// Handle one chat page connection.
///
/// A reader task parses client frames into the session inbox, a writer task
/// serialises the outbox onto the socket, and the session loop runs here
/// until the reader hangs up.
async fn handle_socket(socket: WebSocket, gw: SharedGateway) {
    let (conn_id, backend) = {
        let mut gw = gw.lock().await;
        (gw.pages_mut().open(), gw.backend())
    };
    info!(connection = %conn_id, "Chat page connected");

    let (mut sink, mut stream) = socket.split();
    let (in_tx, in_rx) = mpsc::channel::<ClientMessage>(INBOX_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOX_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialise server message");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_outbox = out_tx.clone();
    let reader_gw = Arc::clone(&gw);
    let reader = tokio::spawn(async move {
        while let Some(Ok(ws_msg)) = stream.next().await {
            let text = match ws_msg {
                WsMessage::Text(t) => t.to_string(),
                WsMessage::Close(_) => break,
                _ => continue,
            };
            let msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    let err = ServerMessage::error("PARSE_ERROR", format!("Invalid message: {e}"));
                    let _ = reader_outbox.send(err).await;
                    continue;
                }
            };
            if matches!(msg, ClientMessage::Submit { .. }) {
                reader_gw.lock().await.pages_mut().count_submission(&conn_id);
            }
            if in_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let session = run_session(backend, in_rx, out_tx).await;
    let _ = reader.await;
    let _ = writer.await;

    let closed = gw.lock().await.pages_mut().close(&conn_id);
    debug!(
        connection = %conn_id,
        turns = session.turns().len(),
        submissions = closed.map_or(0, |p| p.submissions),
        "Chat page disconnected"
    );
}

/// Serve the gateway on the configured address until `shutdown` resolves.
pub async fn run<F>(gw: SharedGateway, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = gw.lock().await.config().bind_addr();
    let app = router(gw);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "Chat gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Chat gateway stopped");
    Ok(())
}
