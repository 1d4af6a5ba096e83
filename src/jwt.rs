use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde_json::json;

use crate::app::AppState;
use crate::authz::{Caller, PermissionResolver, PermissionSet};
use crate::errors::{AclError, AclResult};

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
}

impl JwtConfig {
    pub fn new(secret: impl Into<Vec<u8>>, exp_hours: i64) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            exp_hours,
        }
    }

    pub fn from_env() -> Result<Self, AclError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AclError::configuration("JWT_SECRET not set"))?;
        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(24))
            .map_err(|_| AclError::configuration("JWT_EXP_HOURS must be a valid integer"))?;

        Ok(Self::new(secret.into_bytes(), exp_hours))
    }

    pub fn encode(&self, subject: &str, permissions: &[String]) -> AclResult<String> {
        use chrono::{Duration, Utc};

        let now = Utc::now();
        let exp = now + Duration::hours(self.exp_hours);

        let claims = Claims {
            sub: subject.to_string(),
            permissions: permissions.to_vec(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AclError::token(err.to_string()))
    }

    pub fn decode(&self, token: &str) -> AclResult<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AclError::token(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    /// Identifier of the caller's own record.
    pub sub: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: usize,
    pub iat: usize,
}

/// Resolves callers from `Authorization: Bearer <jwt>`.
///
/// No header means an anonymous caller; a header that does not verify is
/// rejected.
#[derive(Debug, Clone)]
pub struct JwtPermissionResolver {
    jwt: Arc<JwtConfig>,
}

impl JwtPermissionResolver {
    pub fn new(jwt: JwtConfig) -> Self {
        Self { jwt: Arc::new(jwt) }
    }
}

#[async_trait]
impl PermissionResolver for JwtPermissionResolver {
    async fn resolve(&self, parts: &Parts) -> AclResult<Caller> {
        let Some(header) = parts.headers.get(axum::http::header::AUTHORIZATION) else {
            return Ok(Caller::anonymous());
        };

        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AclError::unauthorized("Authorization header must be a bearer token"))?;

        let claims = self.jwt.decode(token)?;
        tracing::debug!(sub = %claims.sub, grants = claims.permissions.len(), "caller resolved");

        Ok(Caller::new(PermissionSet::from_names(claims.permissions)).with_record(json!({ "_id": claims.sub })))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AclError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state.resolver.resolve(parts).await
    }
}
