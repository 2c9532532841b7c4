use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use verso_core::model::{ProfileUpdate, ReaderProfile, User};

use crate::auth::CurrentCaller;
use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/users", post(register))
        .route("/api/v1/login", post(login))
        .route("/api/v1/me", get(profile).put(update_profile))
        .route("/api/v1/me/password", put(change_password))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub password: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Credentials>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.accounts.register(&req.username, &req.password).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Verify credentials. Session tokens are issued by the fronting auth layer.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Credentials>,
) -> Result<Json<User>, ApiError> {
    let user = state.accounts.authenticate(&req.username, &req.password).await?;
    Ok(Json(user))
}

async fn change_password(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    state.accounts.change_password(&caller, &req.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn profile(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
) -> Result<Json<ReaderProfile>, ApiError> {
    Ok(Json(state.accounts.profile(&caller).await?))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ReaderProfile>, ApiError> {
    Ok(Json(state.accounts.update_profile(&caller, update).await?))
}
