use axum::{Extension, Json, extract::State};
use tracing::info;

use parley_types::api::{ChatResponse, ChatStatus, CreateChatRequest, UserIdQuery};
use parley_types::models::ChatSummary;

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::middleware::Caller;
use crate::state::{AppState, run_blocking};

/// GET /chats?user_id= — the user's chats, newest first, with the
/// counterpart's name, avatar and presence inlined.
pub async fn list_chats(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<UserIdQuery>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let chats = run_blocking(&state, move |s| Ok(s.db.list_chats_for_user(query.user_id)?)).await?;
    Ok(Json(chats))
}

/// POST /chats — returns the existing chat for the pair in either order,
/// or opens a new one.
pub async fn get_or_create_chat(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiJson(req): ApiJson<CreateChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.user1_id == req.user2_id {
        return Err(ApiError::Validation(
            "A chat needs two distinct users".to_string(),
        ));
    }

    let (chat, created) = run_blocking(&state, move |s| {
        Ok(s.db.get_or_create_chat(req.user1_id, req.user2_id)?)
    })
    .await?;

    let status = if created {
        info!(
            chat_id = chat.id,
            user1_id = chat.user1_id,
            user2_id = chat.user2_id,
            caller = ?caller.user_id,
            "Chat created"
        );
        ChatStatus::Created
    } else {
        ChatStatus::Found
    };

    Ok(Json(ChatResponse { chat, status }))
}
