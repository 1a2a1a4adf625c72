use axum::extract::State;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::db::models::PublicUser;
use crate::error::{AppError, AppResult};
use crate::extractors::{AppPath, CurrentUser};
use crate::routes::posts::remove_post;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/posts/{id}", delete(delete_post))
}

fn require_admin(user: &CurrentUser) -> AppResult<()> {
    if !user.is_admin {
        return Err(AppError::forbidden("Admin access required"));
    }
    Ok(())
}

async fn list_users(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Value>> {
    require_admin(&user)?;

    let users: Vec<PublicUser> = state
        .users
        .find_all()
        .await?
        .iter()
        .map(PublicUser::from)
        .collect();
    Ok(Json(json!({ "success": true, "users": users })))
}

async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    AppPath(id): AppPath<String>,
) -> AppResult<Json<Value>> {
    require_admin(&user)?;

    let post = state
        .posts
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))?;

    remove_post(&state, &id, &post.doc.body.images).await?;
    tracing::info!("Admin {} removed post {}", user.handle, id);
    Ok(Json(json!({ "success": true })))
}
