use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::store::{ConversationStore, StoreError, INDEX_SCAN_LIMIT, MAX_RANGE_COUNT};
use crate::types::{IntakeBody, Role, ThreadQuery};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub struct AppState {
    pub store: ConversationStore,
    pub admin_token: Option<String>,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "ok": false, "error": "Unauthorized" })),
    )
}

/// Shared-secret check for the admin endpoints. Rejects when the secret is
/// unset on the server or the supplied header does not match exactly; the
/// store is never touched on the rejection path.
fn admin_from_headers(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<Value>)> {
    let Some(expected) = state
        .admin_token
        .as_deref()
        .filter(|token| !token.is_empty())
    else {
        return Err(unauthorized());
    };
    let supplied = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if supplied != expected {
        return Err(unauthorized());
    }
    Ok(())
}

fn store_failure(err: &StoreError) -> (StatusCode, Json<Value>) {
    let status = match err {
        StoreError::Unavailable(_) => {
            tracing::error!(%err, "store operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({ "ok": false, "error": err.reason() })))
}

async fn post_support_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IntakeBody>,
) -> impl IntoResponse {
    match state
        .store
        .append(&body.email, &body.session_id, Role::User, &body.message)
        .await
    {
        Ok(_) => Json(json!({ "ok": true })).into_response(),
        Err(err) => store_failure(&err).into_response(),
    }
}

async fn get_support_thread(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ThreadQuery>,
) -> impl IntoResponse {
    match state
        .store
        .range(&query.email, &query.session_id, 0, MAX_RANGE_COUNT)
        .await
    {
        Ok(messages) => Json(json!({ "ok": true, "messages": messages })).into_response(),
        Err(err) => store_failure(&err).into_response(),
    }
}

async fn get_admin_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(rejection) = admin_from_headers(&state, &headers) {
        return rejection.into_response();
    }

    match state.store.list_index(INDEX_SCAN_LIMIT).await {
        Ok(list) => Json(json!({ "ok": true, "list": list })).into_response(),
        Err(err) => store_failure(&err).into_response(),
    }
}

async fn post_admin_reply(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IntakeBody>,
) -> impl IntoResponse {
    if let Err(rejection) = admin_from_headers(&state, &headers) {
        return rejection.into_response();
    }

    match state
        .store
        .append(&body.email, &body.session_id, Role::Admin, &body.message)
        .await
    {
        Ok(_) => Json(json!({ "ok": true })).into_response(),
        Err(err) => store_failure(&err).into_response(),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/support/message", post(post_support_message))
        .route("/api/support/thread", get(get_support_thread))
        .route("/api/admin/conversations", get(get_admin_conversations))
        .route("/api/admin/reply", post(post_admin_reply))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
