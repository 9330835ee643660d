use axum::{
    extract::Request,
    http::HeaderName,
    middleware::Next,
    response::Response,
};
use tracing::warn;

/// Header a client uses to say who it is acting as.
pub static CALLER_HEADER: HeaderName = HeaderName::from_static("x-user-id");

/// Who the request claims to come from. The id is taken from the request
/// as-is; nothing here proves the caller owns it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<i64>,
}

/// Resolve the [`Caller`] for every request and stash it in the request
/// extensions. This is the one place to swap in real authentication.
pub async fn identify_caller(mut req: Request, next: Next) -> Response {
    let caller = match req.headers().get(&CALLER_HEADER) {
        None => Caller::default(),
        Some(value) => match value.to_str().ok().and_then(|v| v.trim().parse::<i64>().ok()) {
            Some(id) => Caller { user_id: Some(id) },
            None => {
                warn!("Ignoring malformed {} header", CALLER_HEADER);
                Caller::default()
            }
        },
    };

    req.extensions_mut().insert(caller);
    next.run(req).await
}
