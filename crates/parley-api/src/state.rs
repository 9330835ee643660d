use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use parley_db::Database;

use crate::error::ApiError;
use crate::password::{Argon2Hasher, CredentialHasher};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub hasher: Box<dyn CredentialHasher>,
    pub settings: Settings,
}

/// Request-handling knobs that are not part of the store.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Domain used for `{username}@{domain}` when registration omits an email.
    pub email_domain: String,
    pub default_avatar_url: String,
    /// Upper bound on a single store operation, queueing included.
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            email_domain: "parley.local".to_string(),
            default_avatar_url: "https://api.dicebear.com/7.x/avataaars/svg?seed=parley".to_string(),
            request_timeout: Duration::from_millis(5000),
        }
    }
}

impl AppStateInner {
    pub fn new(db: Database, settings: Settings) -> Self {
        Self {
            db,
            hasher: Box::new(Argon2Hasher::default()),
            settings,
        }
    }

    pub fn with_hasher(mut self, hasher: impl CredentialHasher + 'static) -> Self {
        self.hasher = Box::new(hasher);
        self
    }
}

/// Run blocking store work (and password hashing) off the async runtime,
/// bounded by the configured request timeout.
///
/// The same deadline guards writes inside `f`: once the caller has been
/// told [`ApiError::Transient`], a write still queued for the writer
/// connection is dropped instead of committed.
pub async fn run_blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let timeout = state.settings.request_timeout;
    let deadline = Instant::now() + timeout;
    let inner = state.clone();
    let task = tokio::task::spawn_blocking(move || {
        parley_db::with_deadline(deadline, || f(inner.as_ref()))
    });

    match tokio::time::timeout_at(deadline.into(), task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("spawn_blocking join error: {}", e);
            Err(ApiError::Internal(e.to_string()))
        }
        Err(_) => {
            warn!(
                "Store operation exceeded {} ms",
                timeout.as_millis()
            );
            Err(ApiError::Transient)
        }
    }
}
