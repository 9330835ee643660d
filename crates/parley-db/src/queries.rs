use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use parley_types::models::{Chat, ChatSummary, Message, PresenceStatus, PresenceUpdate};

use crate::Database;
use crate::error::{Result, StoreError};
use crate::models::{NewUser, UserRow};

const USER_COLUMNS: &str =
    "id, username, email, password_hash, avatar_url, is_online, last_seen, created_at";
const CHAT_COLUMNS: &str = "id, user1_id, user2_id, created_at";
const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, content, photo_url, is_edited, created_at, updated_at";

impl Database {
    // -- Users --

    /// Insert a user who is online as of now. Duplicate username or email
    /// comes back as [`StoreError::Conflict`] and nothing is written.
    ///
    /// A taken username is reported as such even when the email collides
    /// too, which is always the case for synthesized addresses.
    pub fn create_user(&self, new: &NewUser<'_>) -> Result<UserRow> {
        self.with_conn_mut(|conn| {
            if query_user_by_username(conn, new.username)?.is_some() {
                return Err(StoreError::Conflict(
                    "UNIQUE constraint failed: users.username".to_string(),
                ));
            }

            let now = Utc::now();
            let sql = format!(
                "INSERT INTO users (username, email, password_hash, avatar_url, is_online, last_seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                 RETURNING {USER_COLUMNS}"
            );
            let row = conn.query_row(
                &sql,
                params![new.username, new.email, new.password_hash, new.avatar_url, now],
                user_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    /// Mark a user online after their password was verified against
    /// `password_hash`. The update only applies if the stored hash is still
    /// that value, so a concurrent password change makes this return `None`.
    pub fn record_login(&self, id: i64, password_hash: &str) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let sql = format!(
                "UPDATE users SET is_online = 1, last_seen = ?1
                 WHERE id = ?2 AND password_hash = ?3
                 RETURNING {USER_COLUMNS}"
            );
            let row = conn
                .query_row(&sql, params![Utc::now(), id, password_hash], user_from_row)
                .optional()?;
            Ok(row)
        })
    }

    // -- Presence --

    pub fn get_presence(&self, user_id: i64) -> Result<Option<PresenceStatus>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, is_online, last_seen FROM users WHERE id = ?1",
                    [user_id],
                    |row| {
                        Ok(PresenceStatus {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            is_online: row.get(2)?,
                            last_seen: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Set the online flag and stamp `last_seen`, whichever way the flag goes.
    pub fn set_presence(&self, user_id: i64, is_online: bool) -> Result<PresenceUpdate> {
        self.with_conn_mut(|conn| {
            conn.query_row(
                "UPDATE users SET is_online = ?1, last_seen = ?2 WHERE id = ?3
                 RETURNING id, is_online, last_seen",
                params![is_online, Utc::now(), user_id],
                |row| {
                    Ok(PresenceUpdate {
                        id: row.get(0)?,
                        is_online: row.get(1)?,
                        last_seen: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::NotFound)
        })
    }

    // -- Chats --

    /// All chats `user_id` takes part in, newest first, each carrying the
    /// other participant's profile and presence.
    pub fn list_chats_for_user(&self, user_id: i64) -> Result<Vec<ChatSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.user1_id, c.user2_id, c.created_at,
                        CASE WHEN c.user1_id = ?1 THEN c.user2_id ELSE c.user1_id END,
                        CASE WHEN c.user1_id = ?1 THEN u2.username ELSE u1.username END,
                        CASE WHEN c.user1_id = ?1 THEN u2.avatar_url ELSE u1.avatar_url END,
                        CASE WHEN c.user1_id = ?1 THEN u2.is_online ELSE u1.is_online END,
                        CASE WHEN c.user1_id = ?1 THEN u2.last_seen ELSE u1.last_seen END
                 FROM chats c
                 JOIN users u1 ON c.user1_id = u1.id
                 JOIN users u2 ON c.user2_id = u2.id
                 WHERE c.user1_id = ?1 OR c.user2_id = ?1
                 ORDER BY c.created_at DESC, c.id DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ChatSummary {
                        id: row.get(0)?,
                        user1_id: row.get(1)?,
                        user2_id: row.get(2)?,
                        created_at: row.get(3)?,
                        contact_id: row.get(4)?,
                        contact_name: row.get(5)?,
                        contact_avatar: row.get(6)?,
                        contact_is_online: row.get(7)?,
                        contact_last_seen: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Return the chat for the unordered pair, creating it if needed.
    /// The bool is `true` when this call inserted the row.
    ///
    /// The insert yields to `idx_chats_pair`, so two racing callers end up
    /// with the same chat rather than two.
    pub fn get_or_create_chat(&self, user1_id: i64, user2_id: i64) -> Result<(Chat, bool)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let inserted = tx.execute(
                "INSERT INTO chats (user1_id, user2_id, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT DO NOTHING",
                params![user1_id, user2_id, Utc::now()],
            )?;

            let chat = query_chat_between(&tx, user1_id, user2_id)?.ok_or(StoreError::NotFound)?;
            tx.commit()?;

            Ok((chat, inserted == 1))
        })
    }

    // -- Messages --

    /// Messages of a chat in the order they were sent.
    pub fn list_messages(&self, chat_id: i64) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1
                 ORDER BY created_at ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([chat_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Foreign keys are enforced, so an unknown chat or sender fails with
    /// [`StoreError::Referential`].
    pub fn insert_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        content: &str,
        photo_url: Option<&str>,
    ) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let sql = format!(
                "INSERT INTO messages (chat_id, sender_id, content, photo_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 RETURNING {MESSAGE_COLUMNS}"
            );
            let row = conn.query_row(
                &sql,
                params![chat_id, sender_id, content, photo_url, Utc::now()],
                message_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn edit_message(&self, message_id: i64, content: &str) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let sql = format!(
                "UPDATE messages SET content = ?1, is_edited = 1, updated_at = ?2
                 WHERE id = ?3
                 RETURNING {MESSAGE_COLUMNS}"
            );
            conn.query_row(&sql, params![content, Utc::now(), message_id], message_from_row)
                .optional()?
                .ok_or(StoreError::NotFound)
        })
    }

    /// Hard delete. Returns how many rows went away (0 or 1).
    pub fn delete_message(&self, message_id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute("DELETE FROM messages WHERE id = ?1", [message_id])?;
            debug!(message_id, removed, "delete_message");
            Ok(removed)
        })
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        avatar_url: row.get(4)?,
        is_online: row.get(5)?,
        last_seen: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        user1_id: row.get(1)?,
        user2_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        photo_url: row.get(4)?,
        is_edited: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
    let row = conn.query_row(&sql, [username], user_from_row).optional()?;
    Ok(row)
}

fn query_chat_between(conn: &Connection, user1_id: i64, user2_id: i64) -> Result<Option<Chat>> {
    let sql = format!(
        "SELECT {CHAT_COLUMNS} FROM chats
         WHERE (user1_id = ?1 AND user2_id = ?2) OR (user1_id = ?2 AND user2_id = ?1)"
    );
    let row = conn
        .query_row(&sql, params![user1_id, user2_id], chat_from_row)
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_temp;

    fn add_user(db: &Database, name: &str) -> UserRow {
        let email = format!("{}@parley.local", name);
        db.create_user(&NewUser {
            username: name,
            email: &email,
            password_hash: "hash",
            avatar_url: "avatar",
        })
        .unwrap()
    }

    #[test]
    fn create_user_marks_online() {
        let (_dir, db) = open_temp();
        let before = Utc::now();
        let alice = add_user(&db, "alice");

        assert_eq!(alice.username, "alice");
        assert!(alice.is_online);
        assert!(alice.last_seen.unwrap() >= before);

        let found = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(found.id, alice.id);
        assert!(db.get_user_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_conflict_and_writes_nothing() {
        let (_dir, db) = open_temp();
        add_user(&db, "alice");

        let err = db
            .create_user(&NewUser {
                username: "alice",
                email: "other@parley.local",
                password_hash: "hash",
                avatar_url: "avatar",
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref m) if m.contains("username")));

        let count: i64 = db
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn username_clash_wins_over_email_clash() {
        let (_dir, db) = open_temp();
        add_user(&db, "alice");

        // Same username and same synthesized email
        let err = db
            .create_user(&NewUser {
                username: "alice",
                email: "alice@parley.local",
                password_hash: "hash",
                avatar_url: "avatar",
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref m) if m.ends_with("users.username")));

        let err = db
            .create_user(&NewUser {
                username: "alicia",
                email: "alice@parley.local",
                password_hash: "hash",
                avatar_url: "avatar",
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref m) if m.ends_with("users.email")));
    }

    #[test]
    fn busy_database_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.db");
        let options = crate::DbOptions {
            busy_timeout: std::time::Duration::from_millis(20),
            ..crate::DbOptions::default()
        };
        let db = Database::open(&path, &options).unwrap();
        let alice = add_user(&db, "alice");

        // Another process holds the write lock
        let other = Connection::open(&path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE").unwrap();

        let err = db.set_presence(alice.id, false).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable), "got {:?}", err);
        assert!(err.is_transient());

        other.execute_batch("ROLLBACK").unwrap();
        assert!(!db.set_presence(alice.id, false).unwrap().is_online);
    }

    #[test]
    fn expired_deadline_skips_the_write() {
        let (_dir, db) = open_temp();
        let alice = add_user(&db, "alice");

        let deadline = std::time::Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let err = crate::with_deadline(deadline, || db.set_presence(alice.id, false)).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable));

        let status = db.get_presence(alice.id).unwrap().unwrap();
        assert!(status.is_online);

        // The deadline does not outlive its scope
        assert!(!db.set_presence(alice.id, false).unwrap().is_online);
    }

    #[test]
    fn record_login_requires_matching_hash() {
        let (_dir, db) = open_temp();
        let alice = add_user(&db, "alice");
        db.set_presence(alice.id, false).unwrap();

        assert!(db.record_login(alice.id, "stale").unwrap().is_none());
        let row = db.record_login(alice.id, "hash").unwrap().unwrap();
        assert!(row.is_online);
    }

    #[test]
    fn presence_round_trip() {
        let (_dir, db) = open_temp();
        let alice = add_user(&db, "alice");

        let before = Utc::now();
        let update = db.set_presence(alice.id, false).unwrap();
        assert!(!update.is_online);
        assert!(update.last_seen.unwrap() >= before);

        let status = db.get_presence(alice.id).unwrap().unwrap();
        assert!(!status.is_online);
        assert_eq!(status.last_seen, update.last_seen);

        assert!(db.get_presence(999).unwrap().is_none());
        assert!(matches!(db.set_presence(999, true), Err(StoreError::NotFound)));
    }

    #[test]
    fn chat_pair_is_order_independent() {
        let (_dir, db) = open_temp();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");

        let (first, created) = db.get_or_create_chat(a.id, b.id).unwrap();
        assert!(created);
        let (second, created) = db.get_or_create_chat(b.id, a.id).unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(second.user1_id, a.id);
    }

    #[test]
    fn chat_with_unknown_user_is_referential() {
        let (_dir, db) = open_temp();
        let a = add_user(&db, "alice");
        assert!(matches!(
            db.get_or_create_chat(a.id, 42),
            Err(StoreError::Referential)
        ));
    }

    #[test]
    fn chat_list_projects_counterpart() {
        let (_dir, db) = open_temp();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");
        let c = add_user(&db, "carol");

        let (ab, _) = db.get_or_create_chat(a.id, b.id).unwrap();
        let (ca, _) = db.get_or_create_chat(c.id, a.id).unwrap();
        db.set_presence(c.id, false).unwrap();

        let chats = db.list_chats_for_user(a.id).unwrap();
        assert_eq!(chats.len(), 2);
        // newest first
        assert_eq!(chats[0].id, ca.id);
        assert_eq!(chats[0].contact_id, c.id);
        assert_eq!(chats[0].contact_name, "carol");
        assert!(!chats[0].contact_is_online);
        assert_eq!(chats[1].id, ab.id);
        assert_eq!(chats[1].contact_name, "bob");

        let bobs = db.list_chats_for_user(b.id).unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].contact_id, a.id);

        assert!(db.list_chats_for_user(999).unwrap().is_empty());
    }

    #[test]
    fn messages_keep_insertion_order() {
        let (_dir, db) = open_temp();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");
        let (chat, _) = db.get_or_create_chat(a.id, b.id).unwrap();

        let ids: Vec<i64> = (0..5)
            .map(|i| {
                let sender = if i % 2 == 0 { a.id } else { b.id };
                db.insert_message(chat.id, sender, &format!("m{}", i), None)
                    .unwrap()
                    .id
            })
            .collect();

        let listed = db.list_messages(chat.id).unwrap();
        assert_eq!(listed.iter().map(|m| m.id).collect::<Vec<_>>(), ids);
        assert!(listed.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert!(db.list_messages(chat.id + 1).unwrap().is_empty());
    }

    #[test]
    fn message_to_unknown_chat_is_referential() {
        let (_dir, db) = open_temp();
        let a = add_user(&db, "alice");
        assert!(matches!(
            db.insert_message(77, a.id, "hi", None),
            Err(StoreError::Referential)
        ));
    }

    #[test]
    fn edit_and_delete_message() {
        let (_dir, db) = open_temp();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");
        let (chat, _) = db.get_or_create_chat(a.id, b.id).unwrap();

        let msg = db
            .insert_message(chat.id, a.id, "hi", Some("https://img/x.png"))
            .unwrap();
        assert!(!msg.is_edited);
        assert_eq!(msg.photo_url.as_deref(), Some("https://img/x.png"));

        let edited = db.edit_message(msg.id, "hi!").unwrap();
        assert_eq!(edited.content, "hi!");
        assert!(edited.is_edited);
        assert!(edited.updated_at >= msg.updated_at);
        assert_eq!(edited.created_at, msg.created_at);

        assert!(matches!(db.edit_message(9999, "x"), Err(StoreError::NotFound)));

        assert_eq!(db.delete_message(msg.id).unwrap(), 1);
        assert_eq!(db.delete_message(msg.id).unwrap(), 0);
        assert!(db.list_messages(chat.id).unwrap().is_empty());
    }
}
