use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public identity of a user. Never carries the password hash.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub username: String,
}

/// Access/refresh pair returned by login and refresh.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenPairResponse {
    pub token_type: String,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthResponse {
    pub status: String,
}
