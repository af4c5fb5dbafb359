use axum::{
    extract::{rejection::QueryRejection, ws::WebSocketUpgrade, Query, State},
    response::Response,
};
use serde::Deserialize;

use crate::error::AdmissionError;
use crate::state::AppState;
use crate::ws::actor;
use crate::ws::broadcast::{close_message, CLOSE_POLICY_VIOLATION};

/// Query parameters for WebSocket connection.
/// Auth is via query param `?token=JWT`.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter.
/// On auth failure, upgrades then immediately closes with 1008 (policy violation)
/// before any other frame. On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    query: Result<Query<WsAuthQuery>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> Response {
    // An unreadable query (e.g. a repeated `token`) is a bad credential, not a bad request
    let admission = match query {
        Ok(Query(params)) => state.gate.authenticate(params.token.as_deref()),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Unreadable WebSocket query");
            Err(AdmissionError::InvalidCredential)
        }
    };

    match admission {
        Ok(principal) => {
            tracing::info!(user_id = %principal.id, "WebSocket connection authenticated");
            let hub = state.hub.clone();
            ws.on_upgrade(move |socket| actor::run_connection(socket, hub, principal))
        }
        Err(err) => {
            let reason = err.to_string();
            tracing::warn!(
                close_code = CLOSE_POLICY_VIOLATION,
                reason = %reason,
                "WebSocket auth failed"
            );

            // Upgrade the connection, then immediately close with the policy code
            ws.on_upgrade(move |mut socket| async move {
                let _ = socket
                    .send(close_message(CLOSE_POLICY_VIOLATION, &reason))
                    .await;
            })
        }
    }
}
