use axum::extract::ws::Message;
use tokio::sync::mpsc;

use crate::error::ProtocolError;
use crate::ws::broadcast::encode;
use crate::ws::hub::Hub;
use crate::ws::message::{ClientMessage, ServerMessage};
use crate::ws::ConnectionId;

/// Handle an incoming text frame from an authenticated connection.
/// Replies go straight onto the connection's own queue.
pub fn handle_text_message(
    text: &str,
    connection_id: &ConnectionId,
    tx: &mpsc::UnboundedSender<Message>,
    hub: &Hub,
) {
    let message = match ClientMessage::parse(text) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::debug!(
                connection_id = %connection_id,
                error = %err,
                "Rejected client message"
            );
            send_error(tx, &err);
            return;
        }
    };

    match message {
        ClientMessage::Subscribe { channel, params } => {
            if channel.trim().is_empty() {
                send_error(tx, &ProtocolError::Malformed);
                return;
            }
            hub.subscribe(connection_id, &channel, &params);
            // Acknowledged every time, even when already subscribed
            send(tx, &ServerMessage::Subscribed { channel, params });
        }
        ClientMessage::Unsubscribe { channel, params } => {
            hub.unsubscribe(connection_id, &channel, &params);
            send(tx, &ServerMessage::Unsubscribed { channel, params });
        }
        ClientMessage::Ping => {
            send(
                tx,
                &ServerMessage::Pong {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            );
        }
    }
}

/// Encode and queue a protocol message.
pub fn send(tx: &mpsc::UnboundedSender<Message>, msg: &ServerMessage) {
    if let Some(frame) = encode(msg) {
        let _ = tx.send(frame);
    }
}

pub fn send_error(tx: &mpsc::UnboundedSender<Message>, err: &ProtocolError) {
    send(
        tx,
        &ServerMessage::Error {
            message: err.to_string(),
        },
    );
}
