//! Typed entry points for upstream producers (odds feed, injury feed,
//! settlement engine). Each helper picks the delivery primitive and the
//! channel or event type so producers never build envelopes by hand.

use serde_json::{json, Value};

use crate::ws::broadcast::Broadcaster;
use crate::ws::channel::Params;
use crate::ws::message::{Event, EventKind};

pub const ODDS_CHANNEL: &str = "odds";
pub const LINES_CHANNEL: &str = "lines";
pub const GAME_CHANNEL: &str = "game";

fn params(key: &str, value: Value) -> Params {
    let mut p = Params::new();
    p.insert(key.to_string(), value);
    p
}

/// New prices for a sport, to `odds` subscribers of that sport.
pub fn odds_update<B: Broadcaster + ?Sized>(hub: &B, sport: &str, odds: Value) -> usize {
    hub.broadcast_to_channel(ODDS_CHANNEL, &params("sport", json!(sport)), odds)
}

/// A line moved, to `lines` subscribers of that sport.
pub fn line_movement<B: Broadcaster + ?Sized>(hub: &B, sport: &str, movement: Value) -> usize {
    hub.broadcast_to_channel(LINES_CHANNEL, &params("sport", json!(sport)), movement)
}

/// Live score for one game, to that game's subscribers.
pub fn score_update<B: Broadcaster + ?Sized>(hub: &B, game_id: &str, score: Value) -> usize {
    hub.broadcast_to_channel(GAME_CHANNEL, &params("gameId", json!(game_id)), score)
}

/// A bet was graded; only its owner hears about it.
pub fn bet_settled<B: Broadcaster + ?Sized>(hub: &B, user_id: &str, bet: Value) -> usize {
    hub.broadcast_to_principal(user_id, &Event::new(EventKind::BetSettled, bet))
}

pub fn social_activity<B: Broadcaster + ?Sized>(hub: &B, user_id: &str, activity: Value) -> usize {
    hub.broadcast_to_principal(user_id, &Event::new(EventKind::SocialActivity, activity))
}

pub fn new_prediction<B: Broadcaster + ?Sized>(hub: &B, user_id: &str, prediction: Value) -> usize {
    hub.broadcast_to_principal(user_id, &Event::new(EventKind::NewPrediction, prediction))
}

pub fn injury_update<B: Broadcaster + ?Sized>(hub: &B, injury: Value) -> usize {
    hub.broadcast_all(&Event::new(EventKind::InjuryUpdate, injury))
}

pub fn game_starting<B: Broadcaster + ?Sized>(hub: &B, game: Value) -> usize {
    hub.broadcast_all(&Event::new(EventKind::GameStarting, game))
}
