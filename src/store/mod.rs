// Storage seam - the repositories only ever talk to a `DocumentStore`
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::auth::credentials::CredentialError;
use crate::db::validate::ValidationError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("SQL error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Posts,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Posts => "posts",
        }
    }

    /// Top-level body fields that must be unique within the collection.
    /// Mirrors the unique indexes in the migrations.
    pub fn unique_fields(&self) -> &'static [&'static str] {
        match self {
            Collection::Users => &["id"],
            Collection::Posts => &[],
        }
    }
}

/// A raw document: record id plus an unvalidated JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    ById(String),
    /// Top-level string field equality.
    Field(&'static str, String),
    IdIn(Vec<String>),
}

impl Filter {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::ById(id) => &doc.id == id,
            Filter::Field(name, value) => {
                doc.body.get(*name).and_then(Value::as_str) == Some(value.as_str())
            }
            Filter::IdIn(ids) => ids.iter().any(|id| id == &doc.id),
        }
    }
}

/// Read-modify-write step applied to a single document while the backend
/// holds it exclusively.
pub type Mutation = Box<dyn FnOnce(&mut Value) -> Result<(), StoreError> + Send>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. Fails with `Conflict` if the id or a unique
    /// index is already taken.
    async fn insert(&self, collection: Collection, id: &str, body: Value)
        -> Result<(), StoreError>;

    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError>;

    /// All matching documents, in insertion order.
    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError>;

    /// Apply `mutation` atomically to one document. Returns the document
    /// after the update, or `None` if it does not exist.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        mutation: Mutation,
    ) -> Result<Option<Document>, StoreError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool, StoreError>;
}
