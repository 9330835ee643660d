use serde::{Deserialize, Serialize};

use crate::models::Chat;

// -- Auth --

/// Body of `POST /auth`, dispatched on its `action` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum AuthRequest {
    Register(RegisterRequest),
    Login(LoginRequest),
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    /// Synthesized from the username when absent.
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// -- Chats --

#[derive(Debug, Deserialize)]
pub struct UserIdQuery {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub user1_id: i64,
    pub user2_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Created,
    Found,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    #[serde(flatten)]
    pub chat: Chat,
    pub status: ChatStatus,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct ChatIdQuery {
    pub chat_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct MessageIdQuery {
    pub message_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub chat_id: i64,
    pub sender_id: i64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub photo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub message_id: i64,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteMessageResponse {
    pub success: bool,
}

// -- Presence --

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub user_id: i64,
    #[serde(default = "default_online")]
    pub is_online: bool,
}

fn default_online() -> bool {
    true
}
