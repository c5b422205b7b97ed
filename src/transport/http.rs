use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use super::message::{ApiResponse, MessagesQuery, SessionList, TopicRequest, TopicsResponse};
use crate::config::ServerSettings;
use crate::session::{SessionManager, SessionRequest};
use crate::subscription::qos_from_u8;
use crate::utils::IngestError;

/// Shared state for the request handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestError::Config(_) => StatusCode::BAD_REQUEST,
            IngestError::NotFound(_) => StatusCode::NOT_FOUND,
            IngestError::Conflict(_) | IngestError::InvalidState { .. } => StatusCode::CONFLICT,
            IngestError::Sink(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ApiResponse::error(self.to_string()))).into_response()
    }
}

/// A missing or unreadable JSON body.
fn bad_body(rejection: JsonRejection) -> Response {
    let error = match rejection {
        JsonRejection::MissingJsonContentType(_) => "No JSON received".to_string(),
        other => other.body_text(),
    };
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(error))).into_response()
}

/// Builds the control-surface routes:
/// - POST /api/sessions (start), GET /api/sessions (snapshot)
/// - GET, DELETE /api/sessions/{id}
/// - GET /api/sessions/{id}/messages?since=N
/// - GET, POST, DELETE /api/sessions/{id}/topics
/// - POST /api/subcam01_request (older start route)
/// - GET /health
pub fn router(manager: Arc<SessionManager>) -> Router {
    let state = AppState { manager };

    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(start_session).get(list_sessions))
        .route("/api/subcam01_request", post(start_session))
        .route("/api/sessions/{id}", get(session_status).delete(stop_session))
        .route("/api/sessions/{id}/messages", get(list_messages))
        .route(
            "/api/sessions/{id}/topics",
            get(list_topics).post(add_topic).delete(remove_topic),
        )
        .with_state(state)
}

/// Binds to the configured address and serves until `shutdown` resolves.
pub async fn serve(
    settings: &ServerSettings,
    manager: Arc<SessionManager>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Control surface listening");

    axum::serve(listener, router(manager))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health(State(state): State<AppState>) -> Response {
    Json(state.manager.reporter().health()).into_response()
}

async fn start_session(
    State(state): State<AppState>,
    body: Result<Json<SessionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match state.manager.start_session(&request).await {
        Ok(outcome) => {
            let status = if outcome.created { "started" } else { "existing" };
            Json(ApiResponse::ok(status, &outcome.session_id)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn list_sessions(State(state): State<AppState>) -> Response {
    let sessions = state.manager.reporter().snapshot().into_values().collect();
    Json(SessionList { sessions }).into_response()
}

async fn session_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.status(&id) {
        Ok(view) => Json(view).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn stop_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.stop_session(&id).await {
        Ok(()) => Json(ApiResponse::ok("stopped", &id)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    match state.manager.list_messages(&id, query.since) {
        Ok(page) => Json(page).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn list_topics(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.topics(&id) {
        Ok(topics) => topics_response("ok", id, topics),
        Err(err) => err.into_response(),
    }
}

async fn add_topic(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<TopicRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let Some(qos) = qos_from_u8(request.qos.unwrap_or(0)) else {
        return IngestError::Config("qos must be 0, 1 or 2".to_string()).into_response();
    };

    let manager = &state.manager;
    match manager.add_topic(&id, &request.topic, qos).await {
        Ok(added) => {
            let status = if added { "subscribed" } else { "unchanged" };
            match manager.topics(&id) {
                Ok(topics) => topics_response(status, id, topics),
                Err(err) => err.into_response(),
            }
        }
        Err(err) => err.into_response(),
    }
}

async fn remove_topic(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<TopicRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    let manager = &state.manager;
    match manager.remove_topic(&id, &request.topic).await {
        Ok(removed) => {
            let status = if removed { "unsubscribed" } else { "unchanged" };
            match manager.topics(&id) {
                Ok(topics) => topics_response(status, id, topics),
                Err(err) => err.into_response(),
            }
        }
        Err(err) => err.into_response(),
    }
}

fn topics_response(status: &str, session_id: String, topics: Vec<String>) -> Response {
    Json(TopicsResponse {
        status: status.to_string(),
        session_id,
        topics,
    })
    .into_response()
}
