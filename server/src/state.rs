use std::sync::Arc;

use crate::auth::AuthGate;
use crate::ws::Hub;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Validates `?token=` on the WebSocket upgrade
    pub gate: AuthGate,
    /// The single real-time hub for this process
    pub hub: Arc<Hub>,
}
