use axum::extract::{FromRequest, FromRequestParts};
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use std::convert::Infallible;

use crate::auth::session::{RequestCredentials, SessionError};
use crate::db::models::{PublicUser, Stored, User};
use crate::error::AppError;
use crate::state::AppState;

/// Represents the currently authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// Record id.
    pub id: String,
    pub handle: String,
    pub name: String,
    pub email: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// `Json` whose rejection is an `AppError`, so malformed bodies get the
/// usual `{"error": ...}` response.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// `Path` with the same rejection treatment as [`AppJson`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

impl CurrentUser {
    fn from_record(user: &Stored<User>) -> Self {
        Self {
            id: user.id.clone(),
            handle: user.doc.id.clone(),
            name: user.doc.name.clone(),
            email: user.doc.email.clone(),
            is_admin: user.doc.is_admin,
            created_at: user.doc.created_at,
        }
    }
}

impl From<&CurrentUser> for PublicUser {
    fn from(user: &CurrentUser) -> Self {
        Self {
            record_id: user.id.clone(),
            id: user.handle.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            created_at: user.created_at,
        }
    }
}

impl FromRequestParts<AppState> for RequestCredentials {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(RequestCredentials::from_parts(parts))
    }
}

/// Extractor that requires authentication.
/// Returns 401 if the session carrier is missing or invalid, or names a
/// user that no longer exists.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credentials = RequestCredentials::from_parts(parts);
        let identity = match state.sessions.require_identity(&credentials).await {
            Ok(identity) => identity,
            Err(SessionError::Unauthorized) => return Err(AppError::Unauthenticated),
            Err(other) => return Err(other.into()),
        };

        let user = state
            .users
            .find_by_id(&identity.user_id)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        Ok(CurrentUser::from_record(&user))
    }
}
