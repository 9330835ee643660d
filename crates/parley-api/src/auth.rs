use axum::{Json, extract::State};
use tracing::{info, warn};

use parley_db::models::NewUser;
use parley_types::api::{AuthRequest, LoginRequest, RegisterRequest};
use parley_types::models::User;

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::{AppState, run_blocking};

const MAX_USERNAME_LEN: usize = 32;

/// POST /auth — `{"action": "register" | "login", ...}`.
pub async fn handle_auth(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<AuthRequest>,
) -> Result<Json<User>, ApiError> {
    let user = match req {
        AuthRequest::Register(req) => register(&state, req).await?,
        AuthRequest::Login(req) => login(&state, req).await?,
    };
    Ok(Json(user))
}

async fn register(state: &AppState, req: RegisterRequest) -> Result<User, ApiError> {
    let username = req.username.trim().to_string();
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
        return Err(ApiError::Validation(format!(
            "Username must be 1-{} characters",
            MAX_USERNAME_LEN
        )));
    }
    if req.password.is_empty() {
        return Err(ApiError::Validation("Password is required".to_string()));
    }

    let email = match req.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        Some(email) if !email.contains('@') => {
            return Err(ApiError::Validation("Invalid email".to_string()));
        }
        Some(email) => email.to_string(),
        None => format!("{}@{}", username, state.settings.email_domain),
    };

    let password = req.password;
    let user = run_blocking(state, move |s| {
        let password_hash = s.hasher.hash(&password)?;
        let row = s.db.create_user(&NewUser {
            username: &username,
            email: &email,
            password_hash: &password_hash,
            avatar_url: &s.settings.default_avatar_url,
        })?;
        Ok(row.into_user())
    })
    .await?;

    info!(user_id = user.id, username = %user.username, "User registered");
    Ok(user)
}

async fn login(state: &AppState, req: LoginRequest) -> Result<User, ApiError> {
    let username = req.username.trim().to_string();
    let password = req.password;

    let result = run_blocking(state, move |s| {
        let Some(row) = s.db.get_user_by_username(&username)? else {
            s.hasher.dummy_verify(&password);
            return Err(ApiError::Authentication);
        };

        if !s.hasher.verify(&password, &row.password_hash) {
            return Err(ApiError::Authentication);
        }

        // Only flips presence if the hash we just checked is still current
        let row = s
            .db
            .record_login(row.id, &row.password_hash)?
            .ok_or(ApiError::Authentication)?;
        Ok(row.into_user())
    })
    .await;

    match result {
        Ok(user) => {
            info!(user_id = user.id, "User logged in");
            Ok(user)
        }
        Err(ApiError::Authentication) => {
            warn!("Rejected login attempt");
            Err(ApiError::Authentication)
        }
        Err(e) => Err(e),
    }
}
