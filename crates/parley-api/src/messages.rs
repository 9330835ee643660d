use axum::{Extension, Json, extract::State};
use tracing::{debug, info};

use parley_db::StoreError;
use parley_types::api::{
    ChatIdQuery, DeleteMessageResponse, EditMessageRequest, MessageIdQuery, SendMessageRequest,
};
use parley_types::models::Message;

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::middleware::Caller;
use crate::state::{AppState, run_blocking};

/// GET /messages?chat_id= — oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ChatIdQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = run_blocking(&state, move |s| Ok(s.db.list_messages(query.chat_id)?)).await?;
    Ok(Json(messages))
}

/// POST /messages
pub async fn send_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<Json<Message>, ApiError> {
    let photo_url = req.photo_url.filter(|url| !url.trim().is_empty());

    let message = run_blocking(&state, move |s| {
        Ok(s.db.insert_message(req.chat_id, req.sender_id, &req.content, photo_url.as_deref())?)
    })
    .await?;

    debug!(
        message_id = message.id,
        chat_id = message.chat_id,
        sender_id = message.sender_id,
        caller = ?caller.user_id,
        "Message sent"
    );
    Ok(Json(message))
}

/// PUT /messages — replace the content and flag the message as edited.
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiJson(req): ApiJson<EditMessageRequest>,
) -> Result<Json<Message>, ApiError> {
    let message_id = req.message_id;
    let message = run_blocking(&state, move |s| {
        s.db.edit_message(req.message_id, &req.content).map_err(|e| match e {
            StoreError::NotFound => {
                ApiError::NotFound(format!("Message {} not found", req.message_id))
            }
            other => other.into(),
        })
    })
    .await?;

    info!(message_id, caller = ?caller.user_id, "Message edited");
    Ok(Json(message))
}

/// DELETE /messages?message_id= — idempotent: succeeds whether or not the
/// message existed.
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiQuery(query): ApiQuery<MessageIdQuery>,
) -> Result<Json<DeleteMessageResponse>, ApiError> {
    let message_id = query.message_id;
    let removed = run_blocking(&state, move |s| Ok(s.db.delete_message(message_id)?)).await?;

    info!(
        message_id,
        removed,
        caller = ?caller.user_id,
        "Message delete"
    );
    Ok(Json(DeleteMessageResponse { success: true }))
}
