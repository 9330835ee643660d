//! Relational store for users, chats and messages.
//!
//! [`Database`] owns one writer connection and a small pool of read-only
//! connections onto the same SQLite file. All access goes through
//! [`Database::with_conn`] / [`Database::with_conn_mut`], so a connection is
//! always handed back when the closure returns, error or not.

pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;

use std::cell::Cell;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

pub use error::{Result, StoreError};

thread_local! {
    static WRITE_DEADLINE: Cell<Option<Instant>> = const { Cell::new(None) };
}

/// Run `f` with a write deadline on the current thread. A write that only
/// gets the writer connection after `deadline` fails with
/// [`StoreError::Unavailable`] without touching the database, so a caller
/// that gave up at the deadline knows nothing was written.
pub fn with_deadline<T>(deadline: Instant, f: impl FnOnce() -> T) -> T {
    struct Reset(Option<Instant>);

    impl Drop for Reset {
        fn drop(&mut self) {
            WRITE_DEADLINE.with(|d| d.set(self.0));
        }
    }

    let _reset = Reset(WRITE_DEADLINE.with(|d| d.replace(Some(deadline))));
    f()
}

/// Tunables for [`Database::open`].
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Number of read-only connections. Clamped to at least 1.
    pub reader_pool_size: usize,
    /// How long SQLite waits on a locked database before giving up.
    pub busy_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            reader_pool_size: 4,
            busy_timeout: Duration::from_millis(2000),
        }
    }
}

pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
}

impl Database {
    pub fn open(path: &Path, options: &DbOptions) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(path)?;

        // WAL mode for concurrent reads
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(options.busy_timeout)?;

        migrations::run(&writer)?;

        let pool_size = options.reader_pool_size.max(1);
        let mut readers = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(options.busy_timeout)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            path.display(),
            pool_size
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
        })
    }

    /// Run `f` on the next reader connection, round-robin.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        f(&conn)
    }

    /// Run `f` on the single writer connection. Writes are serialized here.
    ///
    /// Under [`with_deadline`], `f` is skipped if the deadline passed while
    /// waiting for the connection.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .writer
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;

        if let Some(deadline) = WRITE_DEADLINE.with(Cell::get) {
            if Instant::now() >= deadline {
                warn!("Write deadline passed while waiting for the writer, skipping");
                return Err(StoreError::Unavailable);
            }
        }

        f(&mut conn)
    }

    /// Cheap liveness probe used by the health endpoint.
    pub fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Opens a fresh database in a temp dir. Keep the dir alive for the test.
    pub fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("parley.db"), &DbOptions::default())
            .expect("should open");
        (dir, db)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::open_temp;
    use super::*;

    #[test]
    fn open_and_ping() {
        let (_dir, db) = open_temp();
        db.ping().unwrap();
    }

    #[test]
    fn readers_rotate_and_see_writes() {
        let (_dir, db) = open_temp();
        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, password_hash, avatar_url, created_at)
                 VALUES ('alice', 'alice@x', 'h', 'a', '2026-01-01 00:00:00')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        for _ in 0..DbOptions::default().reader_pool_size * 2 {
            let count: i64 = db
                .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
                .unwrap();
            assert_eq!(count, 1);
        }
    }

    #[test]
    fn readers_are_read_only() {
        let (_dir, db) = open_temp();
        let res = db.with_conn(|conn| {
            conn.execute("DELETE FROM users", [])?;
            Ok(())
        });
        assert!(res.is_err());
    }

    #[test]
    fn zero_pool_size_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let options = DbOptions {
            reader_pool_size: 0,
            ..DbOptions::default()
        };
        let db = Database::open(&dir.path().join("nested/parley.db"), &options).unwrap();
        db.ping().unwrap();
    }
}
