//! REST endpoints for the funnel.
//!
//! Thin layer over `FunnelManager`: every handler returns the manager's
//! typed outcome as JSON, with recoverable funnel errors mapped to 4xx.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::catalog::StepKey;
use crate::error::{FunnelError, StoreError};
use crate::manager::FunnelManager;
use crate::state::FunnelState;

/// Shared state for funnel routes.
#[derive(Clone)]
pub struct FunnelRouteState {
    pub manager: Arc<FunnelManager>,
}

/// Session snapshot plus the derived progress fraction.
#[derive(serde::Serialize)]
pub struct FunnelStatus {
    pub state: FunnelState,
    pub progress: f64,
}

#[derive(Deserialize)]
struct AdvanceRequest {
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Deserialize)]
struct VerifyRequest {
    code: String,
}

fn error_response(err: FunnelError) -> Response {
    let status = match &err {
        FunnelError::IncompleteStep { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        FunnelError::AtStart => StatusCode::CONFLICT,
        FunnelError::AlreadyInProgress { .. } => StatusCode::CONFLICT,
        FunnelError::UnknownStep(_) => StatusCode::NOT_FOUND,
        FunnelError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        FunnelError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({"error": err.to_string()})),
    )
        .into_response()
}

async fn status_of(manager: &FunnelManager, session_id: Uuid) -> Result<FunnelStatus, FunnelError> {
    let state = manager.current_state(session_id).await?;
    let progress = manager.progress(session_id).await?;
    Ok(FunnelStatus { state, progress })
}

/// POST /api/funnel/start
async fn start(State(state): State<FunnelRouteState>) -> Response {
    match state.manager.start().await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/funnel/{session}/status
async fn get_status(
    State(state): State<FunnelRouteState>,
    Path(session_id): Path<Uuid>,
) -> Response {
    match status_of(&state.manager, session_id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/funnel/{session}/advance
async fn advance(
    State(state): State<FunnelRouteState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<AdvanceRequest>,
) -> Response {
    match state.manager.advance(session_id, body.fields).await {
        Ok(new_state) => Json(new_state).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/funnel/{session}/back
async fn back(State(state): State<FunnelRouteState>, Path(session_id): Path<Uuid>) -> Response {
    match state.manager.back(session_id).await {
        Ok(new_state) => Json(new_state).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/funnel/{session}/verify
///
/// Suspends until the external verification resolves (or times out) and
/// returns the terminal result; the session has already been routed to its
/// branch target by the time the response lands.
async fn verify(
    State(state): State<FunnelRouteState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<VerifyRequest>,
) -> Response {
    match state
        .manager
        .begin_verification(session_id, &body.code)
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/funnel/{session}/route/{step}
async fn route_check(
    State(state): State<FunnelRouteState>,
    Path((session_id, step)): Path<(Uuid, StepKey)>,
) -> Response {
    match state.manager.evaluate_route(session_id, step).await {
        Ok(decision) => Json(decision).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/funnel/{session}/finish
async fn finish(State(state): State<FunnelRouteState>, Path(session_id): Path<Uuid>) -> Response {
    match state.manager.finish(session_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// Build the funnel REST routes.
pub fn funnel_routes(state: FunnelRouteState) -> Router {
    Router::new()
        .route("/api/funnel/start", post(start))
        .route("/api/funnel/{session}/status", get(get_status))
        .route("/api/funnel/{session}/advance", post(advance))
        .route("/api/funnel/{session}/back", post(back))
        .route("/api/funnel/{session}/verify", post(verify))
        .route("/api/funnel/{session}/route/{step}", get(route_check))
        .route("/api/funnel/{session}/finish", post(finish))
        .with_state(state)
}
