use chrono::{DateTime, Utc};
use parley_types::models::User;

/// Full `users` row, including the stored password hash. Only the auth
/// path reads the hash; everything leaving the crate goes through
/// [`UserRow::into_user`].
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub avatar_url: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn into_user(self) -> User {
        User {
            id: self.id,
            username: self.username,
            email: self.email,
            avatar_url: self.avatar_url,
            is_online: self.is_online,
            last_seen: self.last_seen,
        }
    }
}

/// Values for a `users` insert.
#[derive(Debug)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub avatar_url: &'a str,
}
