use serde::{Deserialize, Serialize};
use validator::Validate;

// -------- REQUEST DTOs --------
#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 255, message = "must not be empty"))]
    pub username: String,
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    pub password: String, // Plain text
}

#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "is required"))]
    pub password: String, // Plain text
}

#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub refresh_token: String,
}
