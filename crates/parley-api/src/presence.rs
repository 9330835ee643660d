use axum::{Extension, Json, extract::State};
use tracing::debug;

use parley_types::api::{SetStatusRequest, UserIdQuery};
use parley_types::models::{PresenceStatus, PresenceUpdate};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::middleware::Caller;
use crate::state::{AppState, run_blocking};

/// GET /users?user_id=
pub async fn get_status(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<UserIdQuery>,
) -> Result<Json<PresenceStatus>, ApiError> {
    let status = run_blocking(&state, move |s| {
        s.db.get_presence(query.user_id)?
            .ok_or_else(|| ApiError::NotFound(format!("User {} not found", query.user_id)))
    })
    .await?;
    Ok(Json(status))
}

/// POST /users — set the online flag. `last_seen` is stamped either way.
pub async fn set_status(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiJson(req): ApiJson<SetStatusRequest>,
) -> Result<Json<PresenceUpdate>, ApiError> {
    let update = run_blocking(&state, move |s| {
        s.db.set_presence(req.user_id, req.is_online).map_err(|e| match e {
            parley_db::StoreError::NotFound => {
                ApiError::NotFound(format!("User {} not found", req.user_id))
            }
            other => other.into(),
        })
    })
    .await?;

    debug!(
        user_id = update.id,
        is_online = update.is_online,
        caller = ?caller.user_id,
        "Presence updated"
    );
    Ok(Json(update))
}
