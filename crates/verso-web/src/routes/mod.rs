mod chat;
mod poems;
mod users;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};

use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .merge(users::routes())
        .merge(poems::routes())
        .merge(chat::routes())
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match state.storage.counts().await {
        Ok(counts) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "database": "connected",
                "provider": state.config.llm.provider,
                "counts": counts,
            })),
        ),
        Err(e) => {
            tracing::error!("health check failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unavailable" })),
            )
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_database() {
        let state = state_with(echo_config());
        seed(&state).await;

        let resp = app(&state).oneshot(get("/health", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["database"], "connected");
        assert_eq!(json["counts"]["poems"], 1);
        assert_eq!(json["counts"]["users"], 2);
    }

    #[tokio::test]
    async fn unknown_identity_is_anonymous_and_garbage_is_rejected() {
        let state = state_with(echo_config());
        let fx = seed(&state).await;
        let uri = format!("/api/v1/poems/{}/sessions", fx.poem_id);

        let req = axum::http::Request::builder()
            .uri(&uri)
            .header("x-verso-user", "9999")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app(&state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = axum::http::Request::builder()
            .uri(&uri)
            .header("x-verso-user", "not-a-number")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app(&state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
