use rusqlite::ErrorCode;
use rusqlite::ffi;
use thiserror::Error;

/// Errors produced by the store layer. SQLite failures are classified on
/// conversion so callers can tell a uniqueness clash from a dangling
/// reference or a busy database.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Any SQLite error that does not fall into a narrower category.
    #[error("Database error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    /// A UNIQUE or PRIMARY KEY constraint rejected the write.
    /// Carries SQLite's message, e.g. `UNIQUE constraint failed: users.username`.
    #[error("Constraint violation: {0}")]
    Conflict(String),

    /// A FOREIGN KEY constraint rejected the write.
    #[error("Referenced record does not exist")]
    Referential,

    /// SQLite stayed busy or locked past the busy timeout.
    #[error("Database is busy")]
    Unavailable,

    /// An update or lookup expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    #[error("Connection lock poisoned: {0}")]
    LockPoisoned(String),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the caller may reasonably retry the same operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable | StoreError::LockPoisoned(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return StoreError::Conflict(
                        message.clone().unwrap_or_else(|| failure.to_string()),
                    );
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return StoreError::Referential,
                _ => {}
            }
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
                return StoreError::Unavailable;
            }
        }
        StoreError::Sqlite(err)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
