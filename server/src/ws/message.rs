//! Wire envelopes, one closed enum per direction.
//!
//! Every frame is a JSON object with a `type` tag. Protocol messages and
//! application events share the tag field but never a tag value, so
//! [`Outbound`] can be decoded without a wrapper.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::ws::channel::Params;

/// Client -> server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        channel: String,
        #[serde(default, deserialize_with = "null_as_empty")]
        params: Params,
    },
    Unsubscribe {
        channel: String,
        #[serde(default, deserialize_with = "null_as_empty")]
        params: Params,
    },
    Ping,
}

impl ClientMessage {
    const TYPES: [&'static str; 3] = ["subscribe", "unsubscribe", "ping"];

    /// Decode a text frame, telling malformed JSON apart from an unknown `type`.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::Malformed)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::Malformed)?;
        if !Self::TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }
        serde_json::from_value(value).map_err(|_| ProtocolError::Malformed)
    }
}

/// Server -> client protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        message: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    Subscribed {
        channel: String,
        params: Params,
    },
    Unsubscribed {
        channel: String,
        params: Params,
    },
    Pong {
        timestamp: i64,
    },
    Error {
        message: String,
    },
    Broadcast {
        channel: String,
        params: Params,
        data: Value,
    },
}

/// Application event types pushed to principals or to everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OddsUpdate,
    LineMovement,
    BetSettled,
    InjuryUpdate,
    NewPrediction,
    GameStarting,
    ScoreUpdate,
    SocialActivity,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OddsUpdate => "odds_update",
            Self::LineMovement => "line_movement",
            Self::BetSettled => "bet_settled",
            Self::InjuryUpdate => "injury_update",
            Self::NewPrediction => "new_prediction",
            Self::GameStarting => "game_starting",
            Self::ScoreUpdate => "score_update",
            Self::SocialActivity => "social_activity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Event {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Anything the server writes to a socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Message(ServerMessage),
    Event(Event),
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Params, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Params>::deserialize(deserializer)?.unwrap_or_default())
}
