use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE,
                email           TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                avatar_url      TEXT NOT NULL,
                is_online       INTEGER NOT NULL DEFAULT 0,
                last_seen       TEXT,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            );

            CREATE TABLE chats (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user1_id    INTEGER NOT NULL REFERENCES users(id),
                user2_id    INTEGER NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                CHECK (user1_id <> user2_id)
            );

            -- One chat per unordered pair, whichever side opened it
            CREATE UNIQUE INDEX idx_chats_pair
                ON chats(min(user1_id, user2_id), max(user1_id, user2_id));
            CREATE INDEX idx_chats_user1 ON chats(user1_id);
            CREATE INDEX idx_chats_user2 ON chats(user2_id);

            CREATE TABLE messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     INTEGER NOT NULL REFERENCES chats(id),
                sender_id   INTEGER NOT NULL REFERENCES users(id),
                content     TEXT NOT NULL DEFAULT '',
                photo_url   TEXT,
                is_edited   INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            );

            CREATE INDEX idx_messages_chat
                ON messages(chat_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn pair_index_rejects_reversed_duplicate() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO users (username, email, password_hash, avatar_url) VALUES ('a', 'a@x', 'h', 'p');
             INSERT INTO users (username, email, password_hash, avatar_url) VALUES ('b', 'b@x', 'h', 'p');
             INSERT INTO chats (user1_id, user2_id) VALUES (1, 2);",
        )
        .unwrap();

        let dup = conn.execute("INSERT INTO chats (user1_id, user2_id) VALUES (2, 1)", []);
        assert!(dup.is_err());
    }

    #[test]
    fn self_chat_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (username, email, password_hash, avatar_url) VALUES ('a', 'a@x', 'h', 'p')",
            [],
        )
        .unwrap();

        let res = conn.execute("INSERT INTO chats (user1_id, user2_id) VALUES (1, 1)", []);
        assert!(res.is_err());
    }
}
