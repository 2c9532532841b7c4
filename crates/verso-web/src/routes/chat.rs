use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use verso_core::conversation::{ChatView, Fragment};
use verso_core::model::{ChatSession, Turn};

use crate::auth::CurrentCaller;
use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/poems/{id}/chat", get(open_chat))
        .route("/api/v1/poems/{id}/sessions", get(list_sessions))
        .route("/api/v1/sessions/{id}/turns", get(list_turns))
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/poems/ask", post(ask))
}

// -- Request/Response types --

#[derive(Debug, Default, Deserialize)]
pub struct OpenChatQuery {
    #[serde(default)]
    pub new: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatRequest {
    pub question: String,
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AskRequest {
    pub question: String,
    pub poem_id: i64,
}

#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub answer: String,
}

// -- Handlers --

async fn open_chat(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Path(poem_id): Path<i64>,
    Query(query): Query<OpenChatQuery>,
) -> Result<Json<ChatView>, ApiError> {
    let view = state
        .conversations
        .open_chat(&caller, poem_id, query.new)
        .await?;
    Ok(Json(view))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Path(poem_id): Path<i64>,
) -> Result<Json<Vec<ChatSession>>, ApiError> {
    Ok(Json(
        state.conversations.sessions_for_poem(&caller, poem_id).await?,
    ))
}

async fn list_turns(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<Turn>>, ApiError> {
    Ok(Json(state.conversations.list(&caller, session_id).await?))
}

/// One question in an existing session. Answers as JSON, or as server-sent
/// events when the client asks for a stream.
async fn chat(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if state.config.web.streaming && (query.stream || accepts_event_stream(&headers)) {
        let fragments = state
            .conversations
            .exchange_stream(&caller, req.session_id, &req.question)
            .await?;
        let session_id = fragments.session_id();

        let events = fragments
            .map(|fragment| match fragment {
                Fragment::Text(text) => sse_event("fragment", &text),
                Fragment::Error(message) => sse_event("error", &message),
            })
            .chain(stream::once(async move {
                sse_event("done", &session_id.to_string())
            }))
            .map(Ok::<_, Infallible>);

        return Ok(Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let answer = state
        .conversations
        .exchange(&caller, req.session_id, &req.question)
        .await?;
    Ok(Json(AnswerResponse { answer }).into_response())
}

async fn ask(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Json(req): Json<AskRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let answer = state
        .conversations
        .ask_about_poem(&caller, req.poem_id, &req.question)
        .await?;
    Ok(Json(AnswerResponse { answer }))
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

/// SSE frames are line-based; carriage returns would split a data line.
fn sse_event(name: &str, data: &str) -> Event {
    Event::default().event(name).data(data.replace('\r', ""))
}
