//! Build event stream
//!
//! `GET /api/v1/builds/:id/events` upgrades to a WebSocket that first sends
//! the current build record, then every event published for the build until
//! it finishes, fails, the client disconnects or the server shuts down.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path,
    },
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use kiln_core::{BuildEngine, BuildEvent, BuildId, EventSubscriber, ShutdownController};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::builds::BuildRecordView;
use super::ApiError;

/// Events buffered between the subscription and the socket
const STREAM_BUFFER: usize = 64;

/// Messages sent to the client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Record snapshot taken once the subscription is open
    Status { build: BuildRecordView },
    /// A published build event
    Event { event: BuildEvent },
    /// The stream could not be served
    Error { message: String },
}

/// Create event stream routes
pub fn events_routes() -> Router {
    Router::new().route("/api/v1/builds/:id/events", get(build_events_handler))
}

/// WebSocket upgrade handler
pub async fn build_events_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    Extension(engine): Extension<Arc<BuildEngine>>,
    Extension(events): Extension<Arc<dyn EventSubscriber>>,
    Extension(shutdown): Extension<Arc<ShutdownController>>,
) -> Response {
    let id: BuildId = match id.parse() {
        Ok(id) => id,
        Err(e) => {
            return ApiError::bad_request(format!("invalid build id '{}': {}", id, e))
                .into_response()
        }
    };
    if let Err(e) = engine.get_status(id).await {
        return ApiError::from(e).into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, engine, events, shutdown, id))
}

type SocketSink = SplitSink<WebSocket, Message>;

async fn send(sender: &mut SocketSink, msg: &StreamMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode stream message");
            true
        }
    }
}

/// Handle WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    engine: Arc<BuildEngine>,
    events: Arc<dyn EventSubscriber>,
    shutdown: Arc<ShutdownController>,
    id: BuildId,
) {
    info!(build_id = %id, "Build event stream opened");
    let (mut sender, mut receiver) = socket.split();

    let cancel = shutdown.token();
    let _guard = cancel.clone().drop_guard();
    let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);

    // Subscribe before reading the snapshot so no event falls in between.
    if let Err(e) = events.subscribe(tx, cancel.clone(), id).await {
        warn!(build_id = %id, error = %e, "Failed to subscribe to build events");
        let _ = send(&mut sender, &StreamMessage::Error { message: e.to_string() }).await;
        return;
    }

    let record = match engine.get_status(id).await {
        Ok(record) => record,
        Err(e) => {
            let _ = send(&mut sender, &StreamMessage::Error { message: e.to_string() }).await;
            return;
        }
    };
    let finished = record.finished;
    if !send(&mut sender, &StreamMessage::Status { build: record.into() }).await {
        return;
    }

    if !finished {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        if !send(&mut sender, &StreamMessage::Event { event }).await {
                            break;
                        }
                    }
                    None => break,
                },
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        debug!(build_id = %id, error = %e, "WebSocket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    info!(build_id = %id, "Build event stream closed");
}
