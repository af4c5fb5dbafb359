pub mod actor;
pub mod broadcast;
pub mod channel;
pub mod handler;
pub mod hub;
pub mod liveness;
pub mod message;
pub mod notify;
pub mod protocol;
pub mod registry;

use tokio::sync::mpsc;

pub use broadcast::Broadcaster;
pub use hub::Hub;

/// Opaque per-socket identifier.
pub type ConnectionId = uuid::Uuid;

/// Type alias for the sender half of a WebSocket connection's channel.
/// The hub clones this to push frames to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
