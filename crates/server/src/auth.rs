//! Connection authentication
//!
//! Tokens arrive via the `token` query parameter or an
//! `Authorization: Bearer` header. A shared secret is compared in constant
//! time; JWTs validate as HS256 against `JWT_SECRET` or RS256 against
//! `JWT_PUBLIC_KEY`. When an IP allow-list is configured the remote address
//! must be on it.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use voicehub_config::ServerConfig;

/// Warn only once per process when the server runs without any auth
static AUTH_DISABLED_WARNED: AtomicBool = AtomicBool::new(false);

/// Authentication failures; all of them close the connection with 4401
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    IpNotAllowed,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            AuthError::MissingToken => "missing token",
            AuthError::InvalidToken => "invalid token",
            AuthError::IpNotAllowed => "ip not allowed",
        };
        f.write_str(msg)
    }
}

/// The authenticated principal of a session
#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
}

/// Authorize one connection attempt.
pub fn authorize(
    config: &ServerConfig,
    token: Option<&str>,
    remote_ip: IpAddr,
) -> Result<Principal, AuthError> {
    if !config.allowed_ips.is_empty() {
        let ip = remote_ip.to_string();
        if !config.allowed_ips.iter().any(|allowed| allowed == &ip) {
            tracing::warn!(%remote_ip, "Connection from IP outside the allow-list");
            return Err(AuthError::IpNotAllowed);
        }
    }

    let auth_configured =
        config.token.is_some() || config.jwt_secret.is_some() || config.jwt_public_key.is_some();
    if !auth_configured {
        if !AUTH_DISABLED_WARNED.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "No WS_TOKEN, JWT_SECRET, or JWT_PUBLIC_KEY configured - accepting unauthenticated connections"
            );
        }
        return Ok(Principal {
            subject: "anonymous".to_string(),
        });
    }

    let token = token.ok_or(AuthError::MissingToken)?;

    // Shared secret first: cheap and the common deployment.
    if let Some(expected) = &config.token {
        if constant_time_compare(token.as_bytes(), expected.as_bytes()) {
            return Ok(Principal {
                subject: "token".to_string(),
            });
        }
        // Fall through to JWT validation when configured; the supplied
        // value may be a JWT even though a shared secret exists.
    }

    if let Some(pem) = &config.jwt_public_key {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
            tracing::error!(error = %e, "JWT_PUBLIC_KEY is not a valid RSA PEM");
            AuthError::InvalidToken
        })?;
        return validate_jwt(token, &key, Algorithm::RS256);
    }

    if let Some(secret) = &config.jwt_secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        return validate_jwt(token, &key, Algorithm::HS256);
    }

    Err(AuthError::InvalidToken)
}

fn validate_jwt(token: &str, key: &DecodingKey, alg: Algorithm) -> Result<Principal, AuthError> {
    let mut validation = Validation::new(alg);
    validation.validate_exp = true;
    // Only the signature and expiry matter here; no audience pinning.
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(token, key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        AuthError::InvalidToken
    })?;

    Ok(Principal {
        subject: data.claims.sub.unwrap_or_else(|| "jwt".to_string()),
    })
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
