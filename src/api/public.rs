//! Public session endpoints: thin pass-throughs over the control API with
//! user-facing responses.

use std::time::SystemTime;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::activity::epoch_ms;
use crate::session::validate_session_id;

use super::error::ApiError;
use super::{PublicState, SessionInfo};

/// What a browser needs to open a session: the token, the bridge port the
/// gateway will relay to, and when the session was created.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PublicSessionCreated {
    session_id: String,
    ws_port: u16,
    created_at: u64,
}

pub(super) async fn session_create(
    State(state): State<PublicState>,
) -> Result<Json<PublicSessionCreated>, ApiError> {
    let created = state.control.create_session().await?;
    Ok(Json(PublicSessionCreated {
        session_id: created.session_id,
        ws_port: created.ws_port,
        created_at: epoch_ms(SystemTime::now()),
    }))
}

pub(super) async fn session_get(
    State(state): State<PublicState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    validate_session_id(&id).map_err(|_| ApiError::InvalidSessionId(id.clone()))?;
    state
        .control
        .get_session(&id)
        .await?
        .map(Json)
        .ok_or(ApiError::SessionNotFound(id))
}

#[derive(Serialize)]
pub(super) struct OkResponse {
    ok: bool,
}

/// Delete is idempotent at the public tier: a session that is already gone
/// still reports success, so a client tearing down on page unload never sees
/// an error for a race it cannot avoid.
pub(super) async fn session_delete(
    State(state): State<PublicState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    validate_session_id(&id).map_err(|_| ApiError::InvalidSessionId(id.clone()))?;
    let _existed = state.control.delete_session(&id).await?;
    Ok(Json(OkResponse { ok: true }))
}

pub(super) async fn session_activity(
    State(state): State<PublicState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    validate_session_id(&id).map_err(|_| ApiError::InvalidSessionId(id.clone()))?;
    if state.control.touch_activity(&id).await? {
        Ok(Json(OkResponse { ok: true }))
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}
