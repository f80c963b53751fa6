use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use crate::app::{AppState, run_blocking};
use crate::error::AppError;

const BEARER: &str = "Bearer ";

/// The raw token from `Authorization: Bearer <JWT>`, not yet verified.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Récupère le header Authorization
        let auth_str = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AppError::InvalidTokenFormat)?
            .to_str()
            .map_err(|_| AppError::InvalidTokenFormat)?;

        // Doit être de type Bearer
        let token = auth_str
            .strip_prefix(BEARER)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AppError::InvalidTokenFormat)?;

        Ok(BearerToken(token.to_string()))
    }
}

/// Extracteur d'authentification pour les routes protégées.
///
/// Verifies the bearer token and, when the service checks revocation,
/// that its persisted record is still active.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;

        let user_id = if state.service.checks_revocation() {
            let (service, ctx, token) = (state.service.clone(), state.context(), token.clone());
            run_blocking(move || service.authenticate(ctx, &token)).await?
        } else {
            state.service.verify_access_token(&token)?
        };

        Ok(AuthUser { user_id, token })
    }
}
