//! Consumer-side reconnection agent.
//!
//! Keeps one logical connection to the hub alive across transport failures,
//! replays subscriptions after every reconnect and fans incoming frames out to
//! registered handlers.

pub mod agent;
pub mod handlers;
pub mod policy;

pub use agent::{Client, ClientConfig, ConnectionState};
pub use handlers::HandlerId;
pub use policy::ReconnectPolicy;
