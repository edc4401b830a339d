//! Signed session and kubeconfig tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::persistence::{UserId, UserRole};

/// Audience of tokens embedded into generated kubeconfig files; they are
/// only honoured by the Kubernetes proxy path.
const KUBECONFIG_AUDIENCE: &str = "kubeconfig";

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("invalid or expired token")]
    Invalid,
    #[error("token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject user ID.
    pub sub: u32,
    pub username: String,
    pub role: UserRole,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Issues and verifies HS256 tokens with a per-installation secret.
#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_lifetime: Duration,
}

impl JwtService {
    pub fn new(secret: &[u8], session_lifetime: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            session_lifetime,
        }
    }

    pub fn issue_session(
        &self,
        user: UserId,
        username: &str,
        role: UserRole,
    ) -> Result<String, JwtError> {
        let claims = SessionClaims {
            sub: user.0,
            username: username.to_string(),
            role,
            exp: (Utc::now() + self.session_lifetime).timestamp(),
            aud: None,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| JwtError::Signing(err.to_string()))
    }

    /// Short-lived token minted per Kubernetes exec request so the API server
    /// can stream on the caller's behalf.
    pub fn issue_kubeconfig(
        &self,
        user: UserId,
        username: &str,
        role: UserRole,
        lifetime: Duration,
    ) -> Result<String, JwtError> {
        let claims = SessionClaims {
            sub: user.0,
            username: username.to_string(),
            role,
            exp: (Utc::now() + lifetime).timestamp(),
            aud: Some(KUBECONFIG_AUDIENCE.to_string()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| JwtError::Signing(err.to_string()))
    }

    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| JwtError::Invalid)
    }
}
