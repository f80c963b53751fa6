use authgate_api::UserResponse;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};

use crate::app::{AppState, run_blocking};
use crate::auth::extractors::AuthUser;
use crate::auth::services::UserListQuery;
use crate::error::AppError;
use crate::response::AppResponse;

/// GET /profile
/// Profil de l'utilisateur connecté
pub async fn get_profile(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<AppResponse<UserResponse>, AppError> {
    let ctx = state.context();
    let service = state.service;

    let user = run_blocking(move || service.get_profile(ctx, auth.user_id)).await?;
    Ok(AppResponse::ok(user))
}

/// GET /users?page=1&per_page=10&sort=created_at%20desc&username[like]=al
pub async fn list_users(
    State(state): State<AppState>,
    _auth: AuthUser,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<AppResponse<Vec<UserResponse>>, AppError> {
    let Query(params) = params.map_err(|e| AppError::invalid_input(e.body_text()))?;
    let query = UserListQuery::from_params(&params)?;
    let ctx = state.context();
    let service = state.service;

    let (users, meta) = run_blocking(move || service.list_users(ctx, query)).await?;
    Ok(AppResponse::ok(users).with_meta(meta))
}
