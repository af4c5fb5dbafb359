//! Admission check for WebSocket upgrades.
//!
//! Every connection must present a valid access token before it is registered
//! with the hub. A production deployment without a signing secret does not start.

use crate::auth::jwt;
use crate::config::Config;
use crate::error::{AdmissionError, HubError};

/// The authenticated identity behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub display_name: String,
}

/// Validates bearer credentials against the process-wide signing secret.
#[derive(Clone)]
pub struct AuthGate {
    secret: Vec<u8>,
}

impl AuthGate {
    /// Build the gate from config.
    ///
    /// Fails with [`HubError::MissingSecret`] in production when no secret is set.
    /// Elsewhere a random secret is generated so the server can still run locally.
    pub fn from_config(config: &Config) -> Result<Self, HubError> {
        match config.jwt_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => Ok(Self::new(secret.as_bytes().to_vec())),
            None if config.is_production() => Err(HubError::MissingSecret),
            None => {
                tracing::warn!(
                    environment = %config.environment,
                    "No JWT secret configured, using an ephemeral one; externally issued tokens will be rejected"
                );
                Ok(Self::new(jwt::generate_ephemeral_secret()))
            }
        }
    }

    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    /// Check the credential supplied with an upgrade request.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Principal, AdmissionError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AdmissionError::MissingCredential)?;

        let claims = jwt::validate_access_token(&self.secret, token).map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            AdmissionError::InvalidCredential
        })?;

        let display_name = claims
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| claims.sub.clone());

        Ok(Principal {
            id: claims.sub,
            display_name,
        })
    }

    /// Mint a token this gate accepts. Test and tooling helper.
    pub fn issue_token(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        ttl_secs: i64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        jwt::issue_access_token(&self.secret, user_id, display_name, ttl_secs)
    }
}
