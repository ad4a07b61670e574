//! WebSocket transport for execution contexts.
//!
//! Each socket is one execution context. Its origin comes from the `Origin`
//! header of the upgrade request, and closing the socket destroys it.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, header},
    response::IntoResponse,
};
use futures::{SinkExt, Stream, StreamExt, stream};
use shellbus_core::{ExecutionContext, Origin};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::trace::TraceLayer;

use crate::{
    protocol::{ClientMessage, ErrorKind, ServerMessage},
    service::RecordingService,
};

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    pub service: Arc<RecordingService>,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub const fn new(service: Arc<RecordingService>) -> Self {
        Self { service }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<WsState>,
) -> impl IntoResponse {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map_or_else(|| Origin::new("", ""), Origin::parse);
    ws.on_upgrade(move |socket| handle_socket(socket, state, origin))
}

async fn handle_socket(socket: WebSocket, state: WsState, origin: Origin) {
    let (ctx, deliveries) = ExecutionContext::new(origin);
    tracing::info!(context = %ctx.id(), origin = %ctx.origin(), "Context connected");

    let (mut sender, receiver) = socket.split();

    // Replies to this context's own calls
    let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Forward replies and channel deliveries to the socket
    let events = UnboundedReceiverStream::new(deliveries).map(|delivery| ServerMessage::Event {
        channel: delivery.channel,
        payload: delivery.payload,
    });
    let mut outgoing = stream::select(UnboundedReceiverStream::new(rx), events);
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outgoing.next().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    serve_context(receiver, &ctx, &state.service, &tx).await;

    ctx.destroy();
    send_task.abort();
    tracing::info!(context = %ctx.id(), "Context disconnected");
}

/// Handle incoming frames until the socket closes or replies can no
/// longer be delivered.
async fn serve_context<S>(
    mut incoming: S,
    ctx: &ExecutionContext,
    service: &RecordingService,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg) = incoming.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let reply = match serde_json::from_str::<ClientMessage>(&msg) {
            Ok(client_msg) => service.handle(ctx, client_msg).await,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                Some(ServerMessage::Error {
                    id: None,
                    kind: ErrorKind::InvalidMessage,
                    message: format!("Invalid message: {e}"),
                })
            }
        };

        let Some(reply) = reply else {
            continue;
        };
        if tx.send(reply).is_err() {
            tracing::debug!(context = %ctx.id(), "Send task ended, closing context");
            break;
        }
    }
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(service));
/// ```
#[must_use]
pub fn create_ws_router(service: Arc<RecordingService>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(WsState::new(service))
}
