//! Bearer token verification (HS256 JWT)

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use prixagent_conversation_core::{AccountId, AuthClaims, OrchestratorError, Result, TokenVerifier, UserId};

use crate::error::ApiError;
use crate::state::AppState;

const MIN_SECRET_LEN: usize = 32;

/// JWT settings shared with the dashboard's token issuer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    /// Lifetime of tokens minted by [`JwtVerifier::issue`]
    pub access_ttl_seconds: u64,
    /// Clock skew tolerance
    pub leeway_seconds: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            issuer: "prixagent".to_string(),
            audience: "prixagent-dashboard".to_string(),
            access_ttl_seconds: 3600,
            leeway_seconds: 30,
        }
    }
}

impl JwtConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(format!("auth jwt_secret must be at least {} bytes", MIN_SECRET_LEN));
        }
        Ok(())
    }
}

/// Claims carried by dashboard tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardClaims {
    pub sub: String,
    pub account_id: String,
    pub iss: String,
    pub aud: String,
    pub exp: u64,
    pub iat: u64,
}

pub struct JwtVerifier {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(config: JwtConfig) -> std::result::Result<Self, String> {
        config.validate()?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.leeway = config.leeway_seconds;
        validation.validate_exp = true;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            config,
        })
    }

    /// Mint a token for a dashboard user
    pub fn issue(&self, user_id: &UserId, account_id: &AccountId) -> Result<String> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let claims = DashboardClaims {
            sub: user_id.to_string(),
            account_id: account_id.to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            exp: now + self.config.access_ttl_seconds,
            iat: now,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| OrchestratorError::internal(format!("failed to sign token: {}", e)))
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<AuthClaims> {
        let data = decode::<DashboardClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!("Rejected token: {}", e);
            OrchestratorError::Unauthorized {
                message: "invalid or expired token".to_string(),
            }
        })?;

        Ok(AuthClaims {
            user_id: UserId::from(data.claims.sub),
            account_id: AccountId::from(data.claims.account_id),
        })
    }
}

/// Verified caller of an API route
#[derive(Debug, Clone)]
pub struct Authenticated(pub AuthClaims);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> std::result::Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
        let claims = state.verifier.verify(token)?;
        Ok(Authenticated(claims))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    (scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty()).then(|| token.trim())
}

/// Shared verifier handle
pub type SharedVerifier = Arc<dyn TokenVerifier>;

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            jwt_secret: "unit-test-secret-unit-test-secret!".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let verifier = JwtVerifier::new(config()).unwrap();
        let token = verifier
            .issue(&UserId::from("alice"), &AccountId::from("a1"))
            .unwrap();

        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.user_id, UserId::from("alice"));
        assert_eq!(claims.account_id, AccountId::from("a1"));
    }

    #[test]
    fn test_rejects_foreign_and_expired_tokens() {
        let verifier = JwtVerifier::new(config()).unwrap();

        let other = JwtVerifier::new(JwtConfig {
            jwt_secret: "another-secret-another-secret-123".into(),
            ..Default::default()
        })
        .unwrap();
        let forged = other.issue(&UserId::from("mallory"), &AccountId::from("a1")).unwrap();
        assert!(verifier.verify(&forged).is_err());

        let wrong_audience = JwtVerifier::new(JwtConfig {
            audience: "someone-else".into(),
            ..config()
        })
        .unwrap()
        .issue(&UserId::from("alice"), &AccountId::from("a1"))
        .unwrap();
        assert!(verifier.verify(&wrong_audience).is_err());

        let expired = JwtVerifier::new(JwtConfig {
            access_ttl_seconds: 0,
            leeway_seconds: 0,
            ..config()
        })
        .unwrap();
        let stale = expired.issue(&UserId::from("alice"), &AccountId::from("a1")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(expired.verify(&stale).is_err());

        assert!(verifier.verify("not-a-jwt").is_err());
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = JwtVerifier::new(JwtConfig {
            jwt_secret: "short".into(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(err.contains("jwt_secret"));
    }
}
