use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use verso_core::model::{PinStatus, Poem, PoemInput, ReadStatus};

use crate::auth::CurrentCaller;
use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/poems", get(list_poems).post(create_poem))
        .route(
            "/api/v1/poems/{id}",
            get(get_poem).put(update_poem).delete(delete_poem),
        )
        .route("/api/v1/poems/{id}/read", post(toggle_read))
        .route("/api/v1/poems/{id}/pin", post(toggle_pin))
}

#[derive(Debug, Serialize)]
pub struct Toggled<S> {
    pub poem_id: i64,
    pub status: S,
}

async fn list_poems(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Poem>>, ApiError> {
    Ok(Json(state.catalog.list_poems().await?))
}

async fn get_poem(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Poem>, ApiError> {
    Ok(Json(state.catalog.get_poem(id).await?))
}

async fn create_poem(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Json(input): Json<PoemInput>,
) -> Result<(StatusCode, Json<Poem>), ApiError> {
    let poem = state.catalog.create_poem(&caller, input).await?;
    Ok((StatusCode::CREATED, Json(poem)))
}

async fn update_poem(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<i64>,
    Json(input): Json<PoemInput>,
) -> Result<Json<Poem>, ApiError> {
    Ok(Json(state.catalog.update_poem(&caller, id, input).await?))
}

async fn delete_poem(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.catalog.delete_poem(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_read(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<i64>,
) -> Result<Json<Toggled<ReadStatus>>, ApiError> {
    let status = state.catalog.toggle_read(&caller, id).await?;
    Ok(Json(Toggled { poem_id: id, status }))
}

async fn toggle_pin(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<i64>,
) -> Result<Json<Toggled<PinStatus>>, ApiError> {
    let status = state.catalog.toggle_pin(&caller, id).await?;
    Ok(Json(Toggled { poem_id: id, status }))
}
