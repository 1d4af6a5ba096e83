use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::store::StoreError;

pub type AclResult<T> = Result<T, AclError>;

#[derive(thiserror::Error, Debug)]
pub enum AclError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {message}")]
    BadRequest { message: String, errors: Vec<Value> },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("token error: {0}")]
    Token(String),
    #[error("storage error")]
    Storage(#[from] StoreError),
    #[error("hook failed: {0}")]
    Hook(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AclError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// Validation failure carrying the hook's error list verbatim.
    pub fn invalid(message: impl Into<String>, errors: Vec<Value>) -> Self {
        Self::BadRequest {
            message: message.into(),
            errors,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn token(err: impl Into<String>) -> Self {
        Self::Token(err.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AclError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AclError::Forbidden(_) => StatusCode::FORBIDDEN,
            AclError::NotFound(_) => StatusCode::NOT_FOUND,
            AclError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AclError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AclError::Token(_) => StatusCode::UNAUTHORIZED,
            AclError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AclError::Hook(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AclError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AclError::Unauthorized(_) => "unauthorized",
            AclError::Forbidden(_) => "forbidden",
            AclError::NotFound(_) => "not_found",
            AclError::BadRequest { .. } => "bad_request",
            AclError::Configuration(_) => "configuration",
            AclError::Token(_) => "token",
            AclError::Storage(_) => "storage",
            AclError::Hook(_) => "hook",
            AclError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<Value>>,
}

impl IntoResponse for AclError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let error = self.code().to_string();
        let errors = match self {
            AclError::BadRequest { errors, .. } => Some(errors),
            _ => None,
        };

        let payload = ErrorResponse {
            error,
            message,
            errors,
        };

        (status, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for AclError {
    fn from(value: anyhow::Error) -> Self {
        Self::Hook(format!("{value:#}"))
    }
}
