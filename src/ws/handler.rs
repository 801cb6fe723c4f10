//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::util::rate_limit::SocketRateLimiter;
use crate::ws::channel::{EventChannel, Outbound};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    // Only used to correlate transport logs; the scheduler keys connections itself
    let socket_id = Uuid::new_v4();
    info!(socket_id = %socket_id, "New WebSocket connection");

    let (channel, remote) = EventChannel::pair();
    if state.intake.send(channel).is_err() {
        error!(socket_id = %socket_id, "Scheduler is not accepting connections");
        return;
    }

    let (ws_sink, ws_stream) = socket.split();

    tokio::select! {
        _ = write_loop(socket_id, ws_sink, remote.outbound) => {}
        _ = read_loop(socket_id, ws_stream, remote.inbound) => {}
    }

    info!(socket_id = %socket_id, "WebSocket connection closed");
}

/// Scheduler -> WebSocket
async fn write_loop(
    socket_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Msg(msg) => {
                if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                    debug!(socket_id = %socket_id, error = %e, "WebSocket send failed");
                    return;
                }
            }
            Outbound::Close => {
                debug!(socket_id = %socket_id, "Server closing connection");
                let _ = ws_sink.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

/// WebSocket -> scheduler. Returning drops the inbound sender, which the
/// scheduler sees as a disconnect.
async fn read_loop(
    socket_id: Uuid,
    mut ws_stream: SplitStream<WebSocket>,
    inbound: mpsc::UnboundedSender<ClientMsg>,
) {
    let rate_limiter = SocketRateLimiter::default();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check() {
                    warn!(socket_id = %socket_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        if inbound.send(client_msg).is_err() {
                            debug!(socket_id = %socket_id, "Inbound channel closed");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(socket_id = %socket_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(socket_id = %socket_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(socket_id = %socket_id, "Client initiated close");
                return;
            }
            Err(e) => {
                error!(socket_id = %socket_id, error = %e, "WebSocket error");
                return;
            }
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
