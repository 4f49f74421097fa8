//! Authentication and authorization collaborator seams.
//!
//! The registry core never evaluates policy itself: token validation goes
//! through [`TokenVerifier`] and visibility decisions through [`Authorizer`].
//! [`JwtVerifier`] is the stock HS256 implementation used by the gateway;
//! deployments with their own token scheme supply their own verifier.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::connection::BoundUser;
use crate::error::{GatewayError, Result};

/// Validated token material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Subject the token was issued to.
    pub subject: String,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

/// Decodes and validates signed token material.
pub trait TokenVerifier: Send + Sync {
    /// Decode `token`, returning its claims or an error when the signature
    /// or expiry is invalid.
    fn decode(&self, token: &str) -> Result<TokenClaims>;
}

/// Identity on whose behalf a registry query runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requester {
    /// Unique user id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Role ids held by this user.
    pub roles: Vec<String>,
}

impl Requester {
    /// Whether this requester holds the given role id.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Visibility decisions over registry entries.
pub trait Authorizer: Send + Sync {
    /// Whether `requester` may read connections bound to `target`.
    fn has_read_authorization(&self, requester: &Requester, target: &BoundUser) -> bool;

    /// Whether `requester` holds an administrative role.
    fn has_admin_role(&self, requester: &Requester) -> bool;
}

/// JWT claims layout accepted by [`JwtVerifier`].
#[derive(Debug, Deserialize)]
struct JwtClaims {
    #[serde(default)]
    sub: String,
    exp: i64,
}

/// HS256 token verifier.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier over a shared secret.
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // No leeway: a token past its expiry must fail decode so the sweep
        // closes the connection rather than refreshing it.
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn decode(&self, token: &str) -> Result<TokenClaims> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation)?;
        let expires_at = DateTime::<Utc>::from_timestamp(data.claims.exp, 0)
            .ok_or_else(|| GatewayError::Auth(format!("invalid exp: {}", data.claims.exp)))?;
        Ok(TokenClaims {
            subject: data.claims.sub,
            expires_at,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
