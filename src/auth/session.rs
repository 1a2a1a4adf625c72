// Identity resolution. One strategy per deployment, picked from config; the
// handlers only ever see `SessionStrategy`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::auth::signing::Signer;
use crate::config::{AuthConfig, SessionKind};

const IDENTITY_KEY: &str = "identity";

/// Who the caller is, as claimed by a verified session carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Session encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Session store error: {0}")]
    Managed(#[from] tower_sessions::session::Error),

    #[error("Session layer is not installed")]
    MissingLayer,
}

/// The bits of a request any strategy may look at.
#[derive(Debug, Clone, Default)]
pub struct RequestCredentials {
    pub headers: HeaderMap,
    pub session: Option<Session>,
}

impl RequestCredentials {
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            headers: parts.headers.clone(),
            session: parts.extensions.get::<Session>().cloned(),
        }
    }

    pub fn from_headers(headers: HeaderMap) -> Self {
        Self {
            headers,
            session: None,
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|s| s.split(';'))
            .map(|s| s.trim())
            .find_map(|cookie| {
                let mut split = cookie.splitn(2, '=');
                let key = split.next()?.trim();
                let val = split.next()?.trim();
                if key == name {
                    Some(val)
                } else {
                    None
                }
            })
    }

    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// What a successful login hands back to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Established {
    pub set_cookie: Option<String>,
    pub token: Option<String>,
}

#[async_trait]
pub trait SessionStrategy: Send + Sync {
    async fn resolve_identity(&self, request: &RequestCredentials) -> Option<Identity>;

    async fn require_identity(
        &self,
        request: &RequestCredentials,
    ) -> Result<Identity, SessionError> {
        self.resolve_identity(request)
            .await
            .ok_or(SessionError::Unauthorized)
    }

    async fn establish(
        &self,
        request: &RequestCredentials,
        identity: &Identity,
    ) -> Result<Established, SessionError>;

    /// End the caller's session. Returns a `Set-Cookie` value when the
    /// client has to drop something.
    async fn clear(&self, request: &RequestCredentials) -> Result<Option<String>, SessionError>;
}

pub fn build_strategy(config: &AuthConfig, signer: Signer) -> Arc<dyn SessionStrategy> {
    match config.strategy {
        SessionKind::Cookie => Arc::new(SignedCookie::new(
            signer,
            config.cookie_name.clone(),
            Duration::days(config.session_days),
            config.secure_cookies,
        )),
        SessionKind::Bearer => Arc::new(BearerToken::new(
            signer,
            Duration::minutes(config.token_minutes),
        )),
        SessionKind::Managed => Arc::new(ManagedSession),
    }
}

// -- Signed cookie --

#[derive(Serialize, Deserialize)]
struct CookiePayload {
    #[serde(flatten)]
    identity: Identity,
    exp: i64,
}

pub struct SignedCookie {
    signer: Signer,
    name: String,
    max_age: Duration,
    secure: bool,
}

impl SignedCookie {
    pub fn new(signer: Signer, name: String, max_age: Duration, secure: bool) -> Self {
        Self {
            signer,
            name,
            max_age,
            secure,
        }
    }

    fn cookie(&self, value: &str, max_age_secs: i64) -> String {
        format!(
            "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
            self.name,
            value,
            max_age_secs,
            if self.secure { "; Secure" } else { "" }
        )
    }
}

#[async_trait]
impl SessionStrategy for SignedCookie {
    async fn resolve_identity(&self, request: &RequestCredentials) -> Option<Identity> {
        let value = request.cookie(&self.name)?;
        let payload = self.signer.verify(value)?;
        let payload: CookiePayload = serde_json::from_slice(&payload).ok()?;

        if payload.exp <= Utc::now().timestamp() {
            tracing::debug!("Expired session cookie for {}", payload.identity.user_id);
            return None;
        }
        Some(payload.identity)
    }

    async fn establish(
        &self,
        _request: &RequestCredentials,
        identity: &Identity,
    ) -> Result<Established, SessionError> {
        let payload = CookiePayload {
            identity: identity.clone(),
            exp: (Utc::now() + self.max_age).timestamp(),
        };
        let value = self.signer.sign(&serde_json::to_vec(&payload)?);

        Ok(Established {
            set_cookie: Some(self.cookie(&value, self.max_age.num_seconds())),
            token: None,
        })
    }

    async fn clear(&self, _request: &RequestCredentials) -> Result<Option<String>, SessionError> {
        Ok(Some(self.cookie("", 0)))
    }
}

// -- Bearer token --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenClaims {
    user_id: String,
    is_admin: bool,
    iat: i64,
    exp: i64,
}

pub struct BearerToken {
    signer: Signer,
    ttl: Duration,
}

impl BearerToken {
    pub fn new(signer: Signer, ttl: Duration) -> Self {
        Self { signer, ttl }
    }
}

#[async_trait]
impl SessionStrategy for BearerToken {
    async fn resolve_identity(&self, request: &RequestCredentials) -> Option<Identity> {
        let token = request.bearer()?;
        let claims: TokenClaims = self.signer.verify_jwt(token)?;

        if claims.exp <= Utc::now().timestamp() {
            tracing::debug!("Expired bearer token for {}", claims.user_id);
            return None;
        }
        Some(Identity {
            user_id: claims.user_id,
            email: None,
            is_admin: claims.is_admin,
        })
    }

    async fn establish(
        &self,
        _request: &RequestCredentials,
        identity: &Identity,
    ) -> Result<Established, SessionError> {
        let now = Utc::now();
        let claims = TokenClaims {
            user_id: identity.user_id.clone(),
            is_admin: identity.is_admin,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        Ok(Established {
            set_cookie: None,
            token: Some(self.signer.sign_jwt(&claims)?),
        })
    }

    async fn clear(&self, _request: &RequestCredentials) -> Result<Option<String>, SessionError> {
        // Stateless: the client discards the token
        Ok(None)
    }
}

// -- Managed session --

/// Delegates storage and cookie handling to the tower-sessions layer.
pub struct ManagedSession;

#[async_trait]
impl SessionStrategy for ManagedSession {
    async fn resolve_identity(&self, request: &RequestCredentials) -> Option<Identity> {
        let session = request.session.as_ref()?;
        match session.get::<Identity>(IDENTITY_KEY).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!("Failed to read managed session: {}", e);
                None
            }
        }
    }

    async fn establish(
        &self,
        request: &RequestCredentials,
        identity: &Identity,
    ) -> Result<Established, SessionError> {
        let session = request.session.as_ref().ok_or(SessionError::MissingLayer)?;
        // New id on login so a pre-login session id can't be fixed by an attacker
        session.cycle_id().await?;
        session.insert(IDENTITY_KEY, identity).await?;
        Ok(Established::default())
    }

    async fn clear(&self, request: &RequestCredentials) -> Result<Option<String>, SessionError> {
        if let Some(session) = request.session.as_ref() {
            session.flush().await?;
        }
        Ok(None)
    }
}
