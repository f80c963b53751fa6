use authgate_api::{ErrorResponse, FieldErrors};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::auth::jwt::JwtError;
use crate::db::error::{PersistenceError, RepositoryError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    // === Validation ===
    #[error("Validation failed")]
    ValidationFailed(FieldErrors),
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // === Identity ===
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Username already taken")]
    DuplicateUsername,
    #[error("Invalid credentials")]
    InvalidCredentials,

    // === Tokens ===
    #[error("Invalid token")]
    InvalidToken,
    #[error("Invalid token format")]
    InvalidTokenFormat,
    #[error("Token already used")]
    TokenAlreadyUsed,

    #[error("Not found: {0}")]
    NotFound(String),

    // === Internal ===
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Token generation failed: {0}")]
    TokenGenerationFailed(String),
    #[error("Password hashing failed: {0}")]
    PasswordHashingFailed(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, internal_detail) = self.get_error_info();

        if let Some(ref detail) = internal_detail {
            tracing::error!(error_code, %status, detail, "Internal server error");
        }

        let mut body = ErrorResponse::new(error_code, message);
        if let AppError::ValidationFailed(errors) = self {
            body = body.with_field_errors(errors);
        }

        (status, Json(body)).into_response()
    }
}

impl AppError {
    /// Status, error code, client message and the detail that is only logged.
    fn get_error_info(&self) -> (StatusCode, &'static str, String, Option<String>) {
        match self {
            // 400 Bad Request
            AppError::ValidationFailed(_) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Validation failed".to_string(),
                None,
            ),
            AppError::InvalidInput(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone(), None)
            }
            AppError::InvalidTokenFormat => (
                StatusCode::BAD_REQUEST,
                "INVALID_TOKEN_FORMAT",
                "Token format is invalid".to_string(),
                None,
            ),

            // 409 Conflict
            AppError::DuplicateEmail => (
                StatusCode::CONFLICT,
                "DUPLICATE_EMAIL",
                "Email already registered".to_string(),
                None,
            ),
            AppError::DuplicateUsername => (
                StatusCode::CONFLICT,
                "DUPLICATE_USERNAME",
                "Username already taken".to_string(),
                None,
            ),

            // 401 Unauthorized
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid email or password".to_string(),
                None,
            ),
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "Invalid or expired token".to_string(),
                None,
            ),
            AppError::TokenAlreadyUsed => (
                StatusCode::UNAUTHORIZED,
                "TOKEN_ALREADY_USED",
                "Refresh token has already been used".to_string(),
                None,
            ),

            // 404 Not Found
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),

            // 500 Internal Server Error
            AppError::DatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "An error occurred with the database".to_string(),
                Some(msg.clone()),
            ),
            AppError::ConnectionError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONNECTION_ERROR",
                "The service is temporarily unavailable".to_string(),
                Some(msg.clone()),
            ),
            AppError::TokenGenerationFailed(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "TOKEN_ERROR",
                "An error occurred while generating token".to_string(),
                Some(msg.clone()),
            ),
            AppError::PasswordHashingFailed(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "HASHING_ERROR",
                "An error occurred while processing your request".to_string(),
                Some(msg.clone()),
            ),
            AppError::InternalServerError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred".to_string(),
                Some(msg.clone()),
            ),
        }
    }

    // === Constructeurs helpers ===
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::InternalServerError(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        AppError::InvalidInput(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        self.get_error_info().0
    }
}

// === Conversions automatiques depuis d'autres types d'erreurs ===

impl From<PersistenceError> for AppError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound(what) => AppError::not_found(what),
            PersistenceError::Connection(msg) => AppError::ConnectionError(msg),
            PersistenceError::Timeout(operation) => {
                AppError::ConnectionError(format!("deadline exceeded before {operation}"))
            }
            other => AppError::DatabaseError(other.to_string()),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::DuplicateEmail => AppError::DuplicateEmail,
            RepositoryError::DuplicateUsername => AppError::DuplicateUsername,
            RepositoryError::NotFound { entity } => AppError::not_found(format!("{entity} not found")),
            RepositoryError::Hashing(msg) => AppError::PasswordHashingFailed(msg),
            RepositoryError::Persistence {
                operation,
                entity,
                source,
            } => match source {
                PersistenceError::Connection(msg) => {
                    AppError::ConnectionError(format!("{operation} {entity}: {msg}"))
                }
                PersistenceError::Timeout(_) => {
                    AppError::ConnectionError(format!("{operation} {entity}: {source}"))
                }
                other => AppError::DatabaseError(format!("{operation} {entity}: {other}")),
            },
        }
    }
}

impl From<JwtError> for AppError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::GenerationFailed(e) => AppError::TokenGenerationFailed(e.to_string()),
            JwtError::VerificationFailed(_) | JwtError::Expired | JwtError::TypeMismatch { .. } => {
                AppError::InvalidToken
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let messages = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| format!("is invalid ({})", e.code))
                    })
                    .collect();
                (field.to_string(), messages)
            })
            .collect();
        AppError::ValidationFailed(fields)
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        AppError::invalid_input(format!("Invalid JSON: {}", err.body_text()))
    }
}
