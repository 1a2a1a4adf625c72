pub mod admin;
pub mod auth;
pub mod posts;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::time::Duration;
use tower_sessions::cookie::SameSite;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::config::SessionKind;
use crate::state::AppState;

/// The full application router, state applied.
pub fn build_app(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .merge(auth::router())
        .merge(posts::router())
        .merge(admin::router())
        .nest_service("/uploads", ServeDir::new(&state.uploads_dir));

    let auth = &state.config.auth;
    if auth.strategy == SessionKind::Managed {
        let session_layer = SessionManagerLayer::new(MemoryStore::default())
            .with_secure(auth.secure_cookies)
            .with_same_site(SameSite::Lax)
            .with_name(auth.cookie_name.clone())
            .with_http_only(true)
            .with_expiry(Expiry::OnInactivity(Duration::days(auth.session_days)));
        app = app.layer(session_layer);
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
