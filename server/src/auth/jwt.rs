use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Access token claims presented on the WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal (user) ID
    pub sub: String,
    /// Display name; older tokens may omit it
    #[serde(default)]
    pub name: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Generate a throwaway 256-bit signing secret.
/// Only used outside production when no secret is configured.
pub fn generate_ephemeral_secret() -> Vec<u8> {
    let key: [u8; 32] = rand::rng().random();
    key.to_vec()
}

/// Sign an HS256 access token for `user_id` valid for `ttl_secs`.
/// Token issuance is owned by the auth service; this exists for tests and local tooling.
pub fn issue_access_token(
    secret: &[u8],
    user_id: &str,
    display_name: Option<&str>,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        name: display_name.map(str::to_string),
        iat: now,
        exp: now + ttl_secs,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Validate an access token and return its claims.
pub fn validate_access_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips_claims() {
        let secret = generate_ephemeral_secret();
        let token = issue_access_token(&secret, "u1", Some("Ada"), 900).unwrap();
        let claims = validate_access_token(&secret, &token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.name.as_deref(), Some("Ada"));
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_access_token(b"secret-a", "u1", None, 900).unwrap();
        assert!(validate_access_token(b"secret-b", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        // Beyond jsonwebtoken's default 60s leeway
        let token = issue_access_token(b"secret", "u1", None, -600).unwrap();
        let err = validate_access_token(b"secret", &token).unwrap_err();
        assert_eq!(
            err.kind(),
            &jsonwebtoken::errors::ErrorKind::ExpiredSignature
        );
    }

    #[test]
    fn ephemeral_secrets_differ() {
        assert_eq!(generate_ephemeral_secret().len(), 32);
        assert_ne!(generate_ephemeral_secret(), generate_ephemeral_secret());
    }
}
