//! Identity Resolution
//!
//! Validates JWTs issued by the account service and turns them into a
//! connection identity. The server does NOT issue tokens - only validates them.
//!
//! Resolution never fails outward: any problem with the credential downgrades
//! the connection to a guest.

use jsonwebtoken::{decode, DecodingKey, Validation, Algorithm, TokenData};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Digest};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

use crate::core::ids::ConnectionId;
use crate::lobby::presence::Identity;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("JWT_SECRET")
                .or_else(|_| std::env::var("AUTH_SECRET"))
                .ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Check if authentication is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims we accept from the account service.
///
/// Tokens carry the account id as `id`; `sub` is accepted for
/// standard-issue providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Account id as issued by the account service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Subject, used when `id` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Account id from `id`, falling back to `sub`.
    pub fn account_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.sub.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No authentication configured on server.
    #[error("authentication not configured")]
    NotConfigured,
    /// No credential supplied.
    #[error("no credential supplied")]
    MissingCredential,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validate a JWT token and extract claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    if !config.is_configured() {
        return Err(AuthError::NotConfigured);
    }

    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();

    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }

    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }

    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else if let Some(ref secret) = config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = token_data.claims;

    if claims.account_id().is_none() {
        return Err(AuthError::MissingClaim("id".into()));
    }

    // Manual expiry check (in case validation was skipped by the library)
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// IDENTITY COLLABORATOR
// =============================================================================

/// Resolves an opaque credential to an account identity.
pub trait IdentityVerifier: Send + Sync {
    /// Verify a credential.
    fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// JWT-backed verifier.
#[derive(Debug, Clone)]
pub struct JwtVerifier {
    config: AuthConfig,
}

impl JwtVerifier {
    /// Create a verifier.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let claims = validate_token(credential, &self.config)?;
        let account_id = claims
            .account_id()
            .ok_or_else(|| AuthError::MissingClaim("id".into()))?
            .to_string();
        let display_name = claims.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| member_name(&account_id));

        Ok(Identity {
            account_id: Some(account_id),
            display_name,
        })
    }
}

/// Fallback name for an account whose token carries no name.
pub fn member_name(account_id: &str) -> String {
    let prefix: String = account_id.chars().take(6).collect();
    format!("Player-{}", prefix)
}

/// Display name for a guest, stable for the lifetime of the connection.
pub fn guest_name(connection_id: &ConnectionId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"rps-arena-guest:");
    hasher.update(connection_id.as_bytes());
    let hash = hasher.finalize();
    format!("Guest-{}", &hex::encode(&hash[..3]))
}

/// Resolve the identity for a new connection, downgrading to guest on any failure.
pub fn resolve_identity(
    verifier: &dyn IdentityVerifier,
    credential: Option<&str>,
    connection_id: &ConnectionId,
) -> Identity {
    let result = match credential.filter(|c| !c.is_empty()) {
        Some(token) => verifier.verify(token),
        None => Err(AuthError::MissingCredential),
    };

    match result {
        Ok(identity) => identity,
        Err(e) => {
            debug!("Connection {} admitted as guest: {}", connection_id.short(), e);
            Identity::guest(guest_name(connection_id))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
