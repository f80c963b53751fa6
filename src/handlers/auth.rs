use authgate_api::{LoginRequest, RefreshTokenRequest, RegisterRequest, TokenPairResponse, UserResponse};
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;

use crate::app::{AppState, run_blocking};
use crate::auth::extractors::BearerToken;
use crate::error::AppError;
use crate::response::AppResponse;

/// POST /register
/// Inscription d'un nouvel utilisateur
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<AppResponse<UserResponse>, AppError> {
    let Json(payload) = payload?;
    let ctx = state.context();
    let service = state.service;

    let user = run_blocking(move || service.register(ctx, payload)).await?;
    Ok(AppResponse::created(user).with_message("User registered successfully"))
}

/// POST /login
/// Connexion d'un utilisateur
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<AppResponse<TokenPairResponse>, AppError> {
    let Json(payload) = payload?;
    let ctx = state.context();
    let service = state.service;

    let pair = run_blocking(move || service.login(ctx, payload)).await?;
    Ok(AppResponse::ok(pair).with_message("Login successful"))
}

/// POST /token/refresh
/// Rafraîchissement des tokens
pub async fn refresh_token(
    State(state): State<AppState>,
    payload: Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> Result<AppResponse<TokenPairResponse>, AppError> {
    let Json(payload) = payload?;
    let ctx = state.context();
    let service = state.service;

    let pair = run_blocking(move || service.refresh_token_pair(ctx, payload)).await?;
    Ok(AppResponse::ok(pair).with_message("Tokens refreshed"))
}

/// POST /logout
/// Revokes the presented access token.
pub async fn logout(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<AppResponse<()>, AppError> {
    let ctx = state.context();
    let service = state.service;

    run_blocking(move || service.revoke_access_token(ctx, &token))
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => AppError::invalid_input("Token not found or already revoked"),
            other => other,
        })?;

    Ok(AppResponse::message("Logged out successfully"))
}
