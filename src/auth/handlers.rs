use axum::extract::State;
use axum::http::header;
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::session::{Established, Identity, RequestCredentials};
use crate::db::models::{PublicUser, Stored, User};
use crate::db::NewUser;
use crate::error::{AppError, AppResult};
use crate::extractors::{AppJson, CurrentUser};
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct ProfileRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(Serialize)]
struct AuthResponse {
    success: bool,
    user: PublicUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

fn identity_for(user: &Stored<User>) -> Identity {
    Identity {
        user_id: user.id.clone(),
        email: user.doc.email.clone(),
        is_admin: user.doc.is_admin,
    }
}

/// Turn an established session into the login/signup response.
fn signed_in(user: &Stored<User>, established: Established) -> Response {
    let body = AuthResponse {
        success: true,
        user: PublicUser::from(user),
        token: established.token,
    };
    (
        AppendHeaders(established.set_cookie.map(|c| (header::SET_COOKIE, c))),
        Json(body),
    )
        .into_response()
}

pub async fn signup(
    State(state): State<AppState>,
    credentials: RequestCredentials,
    AppJson(req): AppJson<SignupRequest>,
) -> AppResult<Response> {
    let handle = req.username.trim().to_string();
    let email = req.email.trim().to_string();
    if handle.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(AppError::validation(
            "Username, email, and password are required",
        ));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(
            "Password must be at least 8 characters long",
        ));
    }

    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| handle.clone());
    let is_admin = state.config.auth.admin_handles.iter().any(|h| *h == handle);

    let user = state
        .users
        .create(NewUser {
            handle,
            name,
            email: Some(email),
            password: req.password,
            is_admin,
        })
        .await?;

    let established = state
        .sessions
        .establish(&credentials, &identity_for(&user))
        .await?;

    tracing::info!("User signed up: {}", user.doc.id);
    Ok(signed_in(&user, established))
}

pub async fn login(
    State(state): State<AppState>,
    credentials: RequestCredentials,
    AppJson(req): AppJson<LoginRequest>,
) -> AppResult<Response> {
    let handle = req.username.trim();
    if handle.is_empty() || req.password.is_empty() {
        return Err(AppError::InvalidCredentials);
    }

    let user = state
        .users
        .authenticate(handle, &req.password)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    let established = state
        .sessions
        .establish(&credentials, &identity_for(&user))
        .await?;

    tracing::info!("User logged in: {}", user.doc.id);
    Ok(signed_in(&user, established))
}

pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
    credentials: RequestCredentials,
) -> AppResult<Response> {
    let clearing = state.sessions.clear(&credentials).await?;
    tracing::info!("User logged out: {}", user.handle);

    Ok((
        AppendHeaders(clearing.map(|c| (header::SET_COOKIE, c))),
        Json(json!({ "success": true })),
    )
        .into_response())
}

/// The extractor already loaded the record, so this never hits the store again.
pub async fn me(user: CurrentUser) -> AppResult<Response> {
    Ok(Json(json!({ "success": true, "user": PublicUser::from(&user) })).into_response())
}

/// Change the caller's display name.
pub async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(req): AppJson<ProfileRequest>,
) -> AppResult<Response> {
    if req.username.trim().is_empty() {
        return Err(AppError::validation("Name is required"));
    }

    let updated = state.users.update_name_by_id(&user.id, &req.username).await?;
    Ok(Json(json!({ "success": true, "name": updated.doc.name })).into_response())
}
