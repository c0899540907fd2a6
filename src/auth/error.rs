//! Auth Error Types

use axum::http::StatusCode;
use thiserror::Error;

pub const INVALID_CREDENTIALS: &str = "invalid credentials";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing required data: {0}")]
    MissingRequiredData(String),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Employee not found: {0}")]
    EmployeeNotFound(String),

    #[error("Employee already exists: {0}")]
    EmployeeAlreadyExists(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("Permission denied")]
    Forbidden,

    #[error("token error: {0}")]
    Token(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingRequiredData(_) => "MISSING_REQUIRED_DATA",
            AuthError::InvalidUsername(_) => "INVALID_USERNAME",
            AuthError::InvalidRole(_) => "INVALID_ROLE",
            AuthError::InvalidRequest(_) => "INVALID_REQUEST",
            AuthError::EmployeeNotFound(_) => "EMPLOYEE_NOT_FOUND",
            AuthError::EmployeeAlreadyExists(_) => "EMPLOYEE_ALREADY_EXISTS",
            AuthError::Database(_) => "DATABASE_ERROR",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::Forbidden => "PERMISSION_DENIED",
            AuthError::Token(_) => "INVALID_TOKEN",
        }
    }

    /// Message for response envelopes. Credential and token failures all
    /// read the same; database details stay in logs.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials | AuthError::Token(_) => INVALID_CREDENTIALS.to_string(),
            AuthError::Database(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Status for the bearer middleware's rejections
    pub fn http_status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials | AuthError::Token(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AuthError::EmployeeAlreadyExists(db.message().to_string())
            }
            _ => AuthError::Database(e.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        AuthError::Token(e.to_string())
    }
}
