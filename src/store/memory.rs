use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Collection, Document, DocumentStore, Filter, Mutation, StoreError};

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Reject `body` if another document (other than `id`) already holds one of
/// the collection's unique field values.
fn check_unique(
    collection: Collection,
    docs: &[Document],
    id: &str,
    body: &Value,
) -> Result<(), StoreError> {
    for field in collection.unique_fields() {
        let Some(value) = body.get(*field).and_then(Value::as_str) else {
            continue;
        };
        let taken = docs
            .iter()
            .filter(|d| d.id != id)
            .any(|d| d.body.get(*field).and_then(Value::as_str) == Some(value));
        if taken {
            return Err(StoreError::Conflict(format!(
                "{} already has a document with {} {}",
                collection.as_str(),
                field,
                value
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        body: Value,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection).or_default();

        if docs.iter().any(|d| d.id == id) {
            return Err(StoreError::Conflict(format!(
                "{} already has a document with id {}",
                collection.as_str(),
                id
            )));
        }
        check_unique(collection, docs, id, &body)?;

        docs.push(Document {
            id: id.to_string(),
            body,
        });
        Ok(())
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        mutation: Mutation,
    ) -> Result<Option<Document>, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(None);
        };
        let Some(index) = docs.iter().position(|d| d.id == id) else {
            return Ok(None);
        };

        // Work on a copy so a failed mutation leaves the stored body untouched
        let mut body = docs[index].body.clone();
        mutation(&mut body)?;
        check_unique(collection, docs, id, &body)?;
        docs[index].body = body;

        Ok(Some(docs[index].clone()))
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|d| d.id != id);
        Ok(docs.len() < before)
    }
}
