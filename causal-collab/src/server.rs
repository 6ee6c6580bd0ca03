//! HTTP + WebSocket surface over the document registry.
//!
//! ```text
//! GET  /{name}?after=a,b   → 200 [vertex, ...]     closure-complement of {a, b}
//! POST /{name}  {vertex}   → 201                    append
//! GET  /{name}?after=a,b   (Upgrade: websocket)
//!                          → backlog, one text frame per vertex,
//!                            then every new vertex in commit order
//! ```
//! Other methods on `/{name}` get 405.
//!
//! Each stream owns a bounded queue fed by its hub callback. A full queue
//! counts as a failed delivery: the hub drops the subscriber, the queue
//! drains, and the connection is closed.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::broadcast::DeliveryFn;
use crate::document::Document;
use crate::hooks::HookRunner;
use crate::protocol::{parse_frontier, Vertex};
use crate::registry::DocumentRegistry;
use crate::storage::{StoreConfig, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Directory holding the registry and every document store
    pub data_dir: PathBuf,
    /// Restore hook command, run before a document is first opened
    pub restore_command: Option<String>,
    /// Replicate hook command, dispatched after a document is first opened
    pub replicate_command: Option<String>,
    /// Maximum replicate hooks running at once
    pub max_replicate_jobs: usize,
    /// Vertices buffered per stream before the subscriber is dropped
    pub subscriber_queue: usize,
    /// RocksDB tuning for the registry and document stores
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            data_dir: PathBuf::from("data"),
            restore_command: None,
            replicate_command: None,
            max_replicate_jobs: 4,
            subscriber_queue: 1024,
            store: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Config for testing: local address, throwaway data dir, no fsync.
    pub fn for_testing(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            store: StoreConfig::for_testing(&data_dir),
            data_dir,
            subscriber_queue: 64,
            ..Self::default()
        }
    }

    pub fn hooks(&self) -> HookRunner {
        HookRunner::new(
            self.data_dir.clone(),
            self.restore_command.clone(),
            self.replicate_command.clone(),
            self.max_replicate_jobs,
        )
    }
}

#[derive(Clone)]
struct AppState {
    registry: Arc<DocumentRegistry>,
    subscriber_queue: usize,
}

#[derive(Debug, Deserialize)]
struct AfterQuery {
    after: Option<String>,
}

type HandlerError = (StatusCode, String);

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<DocumentRegistry>,
}

impl SyncServer {
    /// Open the registry under `config.data_dir`.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let hooks = config.hooks();
        Self::with_hooks(config, hooks)
    }

    /// Like [`SyncServer::new`], reusing a runner the caller already holds so
    /// that its replicate pool stays the only one.
    pub fn with_hooks(config: ServerConfig, hooks: HookRunner) -> Result<Self, StoreError> {
        let registry = DocumentRegistry::open(hooks, config.store.clone())?;
        Ok(Self {
            config,
            registry: Arc::new(registry),
        })
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            subscriber_queue: self.config.subscriber_queue.max(1),
        };

        Router::new()
            .route("/:name", get(read_or_stream).post(write))
            .with_state(state)
    }

    /// Bind `config.bind_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!(
            "Sync server listening on {} (data in {})",
            listener.local_addr()?,
            self.config.data_dir.display()
        );
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

async fn resolve(state: &AppState, name: &str) -> Result<Arc<Document>, HandlerError> {
    state.registry.resolve(name).await.map_err(|e| {
        log::error!("Failed to get document {name:?}: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to get document".to_string(),
        )
    })
}

async fn read_or_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<AfterQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let frontier = match parse_frontier(query.after.as_deref()) {
        Ok(frontier) => frontier,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let document = match resolve(&state, &name).await {
        Ok(document) => document,
        Err(e) => return e.into_response(),
    };

    match ws {
        Some(ws) => {
            let queue = state.subscriber_queue;
            ws.on_upgrade(move |socket| stream(socket, document, frontier, queue))
                .into_response()
        }
        None => read(&document, &frontier).await.into_response(),
    }
}

async fn read(
    document: &Document,
    frontier: &[String],
) -> Result<Json<Vec<Vertex>>, HandlerError> {
    let vertices = document.closure_complement(frontier).await.map_err(|e| {
        log::error!("Failed to read from document {:?}: {e}", document.name());
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to read from document".to_string(),
        )
    })?;
    Ok(Json(vertices))
}

async fn write(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<StatusCode, HandlerError> {
    let vertex = Vertex::from_json(&body).map_err(|e| {
        log::debug!("Rejected body for {name:?}: {e}");
        (StatusCode::BAD_REQUEST, "Invalid request body".to_string())
    })?;

    let document = resolve(&state, &name).await?;
    document
        .append(vertex)
        .await
        .map_err(|e| write_failure(&name, e))?;

    Ok(StatusCode::CREATED)
}

fn write_failure(name: &str, err: StoreError) -> HandlerError {
    match err {
        StoreError::DuplicateVertex(id) => {
            (StatusCode::CONFLICT, format!("Vertex {id} already exists"))
        }
        StoreError::InvalidKey(reason) => {
            (StatusCode::BAD_REQUEST, format!("Invalid vertex id: {reason}"))
        }
        other => {
            log::error!("Failed to write to document {name:?}: {other}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to write to document".to_string(),
            )
        }
    }
}

/// Backlog, then live vertices, until either side gives up.
async fn stream(socket: WebSocket, document: Arc<Document>, frontier: Vec<String>, queue: usize) {
    let (tx, mut rx) = mpsc::channel::<Vertex>(queue);
    let deliver: DeliveryFn = Box::new(move |vertex: &Vertex| tx.try_send(vertex.clone()).is_ok());

    let (backlog, token) = match document.subscribe_after(&frontier, deliver).await {
        Ok(handoff) => handoff,
        Err(e) => {
            log::error!("Failed to read from document {:?}: {e}", document.name());
            return;
        }
    };

    log::info!(
        "Stream opened on {:?} ({} backlog vertices)",
        document.name(),
        backlog.len()
    );

    let (mut sender, mut receiver) = socket.split();

    let mut open = true;
    for vertex in &backlog {
        if !send_vertex(&mut sender, vertex).await {
            open = false;
            break;
        }
    }

    while open {
        tokio::select! {
            queued = rx.recv() => match queued {
                Some(vertex) => open = send_vertex(&mut sender, &vertex).await,
                // Hub dropped this subscriber
                None => open = false,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => open = false,
                Some(Ok(_)) => {}
            },
        }
    }

    document.unsubscribe(token).await;
    let _ = sender.send(Message::Close(None)).await;
    log::info!("Stream closed on {:?}", document.name());
}

async fn send_vertex<S>(sender: &mut S, vertex: &Vertex) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = match vertex.to_json() {
        Ok(text) => text,
        Err(e) => {
            log::error!("Failed to encode vertex {}: {e}", vertex.id);
            return false;
        }
    };
    match sender.send(Message::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            log::debug!("Stream send failed: {e}");
            false
        }
    }
}
