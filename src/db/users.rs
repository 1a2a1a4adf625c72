use std::sync::Arc;

use chrono::Utc;

use crate::auth::credentials::CredentialManager;
use crate::db::models::{Credentials, Stored, User};
use crate::db::modify;
use crate::db::validate::{validate, validate_stored_safe, ValidationError};
use crate::store::{Collection, DocumentStore, Filter, StoreError};

/// Signup input. The password never leaves this struct in plaintext.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub handle: String,
    pub name: String,
    pub email: Option<String>,
    pub password: String,
    pub is_admin: bool,
}

/// Fields to overwrite; `None` leaves a field alone. Nested values are
/// replaced whole.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub credentials: Option<Credentials>,
    pub is_admin: Option<bool>,
}

#[derive(Clone)]
pub struct Users {
    store: Arc<dyn DocumentStore>,
    credentials: CredentialManager,
}

impl Users {
    pub fn new(store: Arc<dyn DocumentStore>, credentials: CredentialManager) -> Self {
        Self { store, credentials }
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub async fn create(&self, new: NewUser) -> Result<Stored<User>, StoreError> {
        if self.find_by_handle(&new.handle).await?.is_some() {
            return Err(StoreError::Conflict("User already exists".into()));
        }

        let credentials = self.credentials.hash(&new.password).await?;
        let now = Utc::now();
        let user = User {
            id: new.handle,
            name: new.name,
            email: new.email,
            credentials,
            is_admin: new.is_admin,
            created_at: now,
            updated_at: now,
        };

        let body = serde_json::to_value(&user)?;
        let user: User = validate(body.clone())?;
        let id = uuid::Uuid::now_v7().to_string();

        // The store rejects a handle taken by a signup racing this one
        self.store
            .insert(Collection::Users, &id, body)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => StoreError::Conflict("User already exists".into()),
                other => other,
            })?;

        tracing::info!("Created user {} ({})", user.id, id);
        Ok(Stored::new(id, user))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Stored<User>>, StoreError> {
        let doc = self
            .store
            .find_one(Collection::Users, &Filter::ById(id.to_string()))
            .await?;
        Ok(doc.and_then(validate_stored_safe))
    }

    pub async fn find_by_handle(&self, handle: &str) -> Result<Option<Stored<User>>, StoreError> {
        let doc = self
            .store
            .find_one(Collection::Users, &Filter::Field("id", handle.to_string()))
            .await?;
        Ok(doc.and_then(validate_stored_safe))
    }

    pub async fn find_all(&self) -> Result<Vec<Stored<User>>, StoreError> {
        self.find_many(&Filter::All).await
    }

    /// Batch lookup by record id; unknown or invalid ids are skipped.
    pub async fn find_by_ids(&self, ids: Vec<String>) -> Result<Vec<Stored<User>>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.find_many(&Filter::IdIn(ids)).await
    }

    async fn find_many(&self, filter: &Filter) -> Result<Vec<Stored<User>>, StoreError> {
        let docs = self.store.find_many(Collection::Users, filter).await?;
        Ok(docs.into_iter().filter_map(validate_stored_safe).collect())
    }

    pub async fn update_by_id(
        &self,
        id: &str,
        update: UserUpdate,
    ) -> Result<Stored<User>, StoreError> {
        modify(self.store.as_ref(), Collection::Users, id, move |user: &mut User| {
            if let Some(name) = update.name {
                user.name = name;
            }
            if let Some(email) = update.email {
                user.email = Some(email);
            }
            if let Some(credentials) = update.credentials {
                user.credentials = credentials;
            }
            if let Some(is_admin) = update.is_admin {
                user.is_admin = is_admin;
            }
            user.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    pub async fn update_name_by_id(&self, id: &str, name: &str) -> Result<Stored<User>, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::field("name", "must not be empty").into());
        }

        self.update_by_id(
            id,
            UserUpdate {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        self.store.delete(Collection::Users, id).await
    }

    /// Look up `handle` and check `password` against its stored credentials.
    /// Unknown handle and wrong password look the same to the caller.
    pub async fn authenticate(
        &self,
        handle: &str,
        password: &str,
    ) -> Result<Option<Stored<User>>, StoreError> {
        let Some(user) = self.find_by_handle(handle).await? else {
            return Ok(None);
        };

        if self.credentials.verify(password, &user.doc.credentials).await {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }
}
