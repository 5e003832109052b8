use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::session::validate_session_id;

use super::error::ApiError;
use super::{InternalState, SessionCreated, SessionInfo};

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(super) async fn session_create(
    State(state): State<InternalState>,
) -> Result<Json<SessionCreated>, ApiError> {
    let record = state.manager.create_session().await.map_err(|e| {
        tracing::error!(error = %e, "session creation failed");
        ApiError::SessionCreateFailed(e.to_string())
    })?;
    Ok(Json(SessionCreated::from(&record)))
}

pub(super) async fn session_get(
    State(state): State<InternalState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    validate_session_id(&id).map_err(|_| ApiError::InvalidSessionId(id.clone()))?;
    state
        .manager
        .get(&id)
        .map(|record| Json(SessionInfo::from(&record)))
        .ok_or(ApiError::SessionNotFound(id))
}

#[derive(Serialize)]
pub(super) struct DeletedResponse {
    message: &'static str,
}

pub(super) async fn session_delete(
    State(state): State<InternalState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    validate_session_id(&id).map_err(|_| ApiError::InvalidSessionId(id.clone()))?;
    if state.manager.delete_session(&id).await {
        Ok(Json(DeletedResponse {
            message: "Session deleted.",
        }))
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}

#[derive(Serialize)]
pub(super) struct OkResponse {
    ok: bool,
}

pub(super) async fn session_activity(
    State(state): State<InternalState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    validate_session_id(&id).map_err(|_| ApiError::InvalidSessionId(id.clone()))?;
    if state.manager.touch(&id) {
        Ok(Json(OkResponse { ok: true }))
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}
