use axum::extract::ws::{CloseFrame, Message};
use serde::Serialize;
use serde_json::Value;

use super::channel::{ChannelKey, Params};
use super::message::Event;
use super::registry::{ConnectionEntry, Registry};

/// Close code for a peer that broke policy (bad or missing credential).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code for server shutdown and heartbeat reaping.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// The three delivery primitives event producers depend on.
///
/// All of them are best-effort: connections that are not open are skipped,
/// nothing is queued for principals without a live connection. The return
/// value is the number of connections the frame was handed to.
pub trait Broadcaster: Send + Sync {
    fn broadcast_all(&self, event: &Event) -> usize;

    fn broadcast_to_principal(&self, principal_id: &str, event: &Event) -> usize;

    fn broadcast_to_channel(&self, channel: &str, params: &Params, data: Value) -> usize;
}

/// Serialize a frame to a text message. Logs and returns `None` on failure.
pub fn encode<T: Serialize>(frame: &T) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize outbound frame");
            None
        }
    }
}

pub fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Hand a frame to one connection. Skips it silently if it is not open.
pub fn send_to_connection(entry: &ConnectionEntry, msg: &Message) -> bool {
    entry.is_open() && entry.sender.send(msg.clone()).is_ok()
}

/// Send to every connection of every principal.
pub fn broadcast_to_all(registry: &Registry, msg: &Message) -> usize {
    registry
        .iter()
        .filter(|entry| send_to_connection(entry, msg))
        .count()
}

/// Send to all connections of one principal (every open tab).
pub fn send_to_principal(registry: &Registry, principal_id: &str, msg: &Message) -> usize {
    registry
        .connections_of(principal_id)
        .filter(|entry| send_to_connection(entry, msg))
        .count()
}

/// Send to every connection subscribed to `key`, whoever owns it.
pub fn broadcast_to_channel(registry: &Registry, key: &ChannelKey, msg: &Message) -> usize {
    registry
        .subscribers(key)
        .filter(|entry| send_to_connection(entry, msg))
        .count()
}
