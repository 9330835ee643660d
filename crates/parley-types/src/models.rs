use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user as seen by clients. The password hash never leaves
/// the store layer, so it has no field here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub avatar_url: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// An undirected 1:1 conversation. `user1_id` is whoever opened it first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub user1_id: i64,
    pub user2_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A chat row enriched with the counterpart's profile and presence,
/// relative to the user whose chat list was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: i64,
    pub user1_id: i64,
    pub user2_id: i64,
    pub created_at: DateTime<Utc>,
    pub contact_id: i64,
    pub contact_name: String,
    pub contact_avatar: String,
    pub contact_is_online: bool,
    pub contact_last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub photo_url: Option<String>,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub id: i64,
    pub username: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub id: i64,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}
