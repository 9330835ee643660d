pub mod auth;
pub mod chats;
pub mod error;
pub mod extract;
pub mod messages;
pub mod middleware;
pub mod password;
pub mod presence;
pub mod state;

use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::{AppState, AppStateInner, Settings};

use crate::middleware::{CALLER_HEADER, identify_caller};
use crate::state::run_blocking;

/// Build the full HTTP surface: one path per service, each answering only
/// its own methods, with CORS and request tracing on everything.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/auth",
            post(auth::handle_auth).fallback(method_not_allowed),
        )
        .route(
            "/chats",
            get(chats::list_chats)
                .post(chats::get_or_create_chat)
                .fallback(method_not_allowed),
        )
        .route(
            "/messages",
            get(messages::list_messages)
                .post(messages::send_message)
                .put(messages::edit_message)
                .delete(messages::delete_message)
                .fallback(method_not_allowed),
        )
        .route(
            "/users",
            get(presence::get_status)
                .post(presence::set_status)
                .fallback(method_not_allowed),
        )
        .route("/health", get(health).fallback(method_not_allowed))
        .fallback(not_found)
        .layer(axum::middleware::from_fn(identify_caller))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Any origin may call; every OPTIONS request is answered as a preflight.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, CALLER_HEADER.clone()])
        .max_age(Duration::from_secs(86400))
        .allow_credentials(false)
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    run_blocking(&state, |s| Ok(s.db.ping()?)).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}
