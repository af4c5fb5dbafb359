use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::auth::Principal;
use crate::error::ProtocolError;
use crate::ws::broadcast::{close_message, CLOSE_GOING_AWAY};
use crate::ws::hub::{ConnectionHandle, Hub};
use crate::ws::message::ServerMessage;
use crate::ws::protocol;
use crate::ws::ConnectionSender;

/// How long the writer may keep flushing (e.g. a final close frame) after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: processes incoming frames until the peer leaves or the hub
///   cancels the connection (heartbeat timeout, shutdown)
///
/// The hub keeps a clone of the sender, so broadcasts and replies share one
/// FIFO queue per connection.
pub async fn run_connection(socket: WebSocket, hub: Arc<Hub>, principal: Principal) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let Some(handle) = admit(&hub, &principal, &tx) else {
        let _ = ws_sender
            .send(close_message(CLOSE_GOING_AWAY, "Server shutting down"))
            .await;
        return;
    };
    let connection_id = handle.id;

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    tracing::info!(
        user_id = %principal.id,
        connection_id = %connection_id,
        "WebSocket actor started"
    );

    loop {
        tokio::select! {
            _ = handle.cancel.cancelled() => {
                tracing::debug!(connection_id = %connection_id, "Connection cancelled by hub");
                break;
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => {
                        protocol::handle_text_message(text.as_str(), &connection_id, &tx, &hub);
                    }
                    Message::Binary(_) => {
                        protocol::send_error(&tx, &ProtocolError::Binary);
                    }
                    Message::Pong(_) => {
                        hub.mark_alive(&connection_id);
                    }
                    Message::Ping(data) => {
                        // Respond to client pings with pong
                        let _ = tx.send(Message::Pong(data));
                    }
                    Message::Close(frame) => {
                        tracing::info!(
                            user_id = %principal.id,
                            reason = ?frame,
                            "Client initiated close"
                        );
                        break;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(
                        user_id = %principal.id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
                None => {
                    // Stream ended, client disconnected
                    tracing::info!(user_id = %principal.id, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    hub.unregister(&connection_id);

    // The writer exits once every sender is gone; give it a moment to flush.
    drop(tx);
    let abort = writer_handle.abort_handle();
    if timeout(WRITER_DRAIN_TIMEOUT, writer_handle).await.is_err() {
        abort.abort();
    }

    tracing::info!(
        user_id = %principal.id,
        connection_id = %connection_id,
        "WebSocket actor stopped"
    );
}

/// Queue the `connected` greeting, then register with the hub.
///
/// The greeting is already on the queue when the connection becomes visible
/// to broadcasts, so it is always the first frame the client sees. If the hub
/// is stopped the queue is dropped unwritten.
fn admit(hub: &Hub, principal: &Principal, tx: &ConnectionSender) -> Option<ConnectionHandle> {
    protocol::send(
        tx,
        &ServerMessage::Connected {
            message: "Connected to real-time updates".to_string(),
            user_id: principal.id.clone(),
        },
    );
    hub.register(principal, tx.clone())
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            // Broken socket, or we just said goodbye
            break;
        }
    }
}
