// SQLite-backed document store. Bodies are JSON text; filters go through
// the JSON1 functions bundled with rusqlite.
use async_trait::async_trait;
use rusqlite::{params, ErrorCode, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use super::{Collection, Document, DocumentStore, Filter, Mutation, StoreError};
use crate::state::DbPool;

pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn parse(rows: Vec<(String, String)>) -> Result<Vec<Document>, StoreError> {
    rows.into_iter()
        .map(|(id, body)| {
            Ok(Document {
                id,
                body: serde_json::from_str(&body)?,
            })
        })
        .collect()
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl SqliteStore {
    fn query(&self, collection: Collection, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let conn = self.pool.get()?;
        let name = collection.as_str();

        let rows: Vec<(String, String)> = match filter {
            Filter::All => {
                let mut stmt = conn.prepare(
                    "SELECT id, body FROM documents WHERE collection = ?1 ORDER BY seq",
                )?;
                let rows = stmt
                    .query_map(params![name], row_to_document)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            Filter::ById(id) => {
                let mut stmt = conn.prepare(
                    "SELECT id, body FROM documents WHERE collection = ?1 AND id = ?2",
                )?;
                let rows = stmt
                    .query_map(params![name, id], row_to_document)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            Filter::Field(field, value) => {
                let mut stmt = conn.prepare(
                    "SELECT id, body FROM documents
                     WHERE collection = ?1 AND json_extract(body, ?2) = ?3
                     ORDER BY seq",
                )?;
                let path = format!("$.{}", field);
                let rows = stmt
                    .query_map(params![name, path, value], row_to_document)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            Filter::IdIn(ids) => {
                let mut stmt = conn.prepare(
                    "SELECT id, body FROM documents
                     WHERE collection = ?1 AND id IN (SELECT value FROM json_each(?2))
                     ORDER BY seq",
                )?;
                let ids = serde_json::to_string(ids)?;
                let rows = stmt
                    .query_map(params![name, ids], row_to_document)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        parse(rows)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        body: Value,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let body = serde_json::to_string(&body)?;

        conn.execute(
            "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
            params![collection.as_str(), id, body],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::Conflict(format!(
                    "{} document {} violates a unique index",
                    collection.as_str(),
                    id
                ))
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.query(collection, filter)?.into_iter().next())
    }

    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        self.query(collection, filter)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        mutation: Mutation,
    ) -> Result<Option<Document>, StoreError> {
        let mut conn = self.pool.get()?;

        // Holds the write lock from read to write; dropping without commit rolls back
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            return Ok(None);
        };

        let mut body: Value = serde_json::from_str(&current)?;
        mutation(&mut body)?;

        tx.execute(
            "UPDATE documents SET body = ?3 WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id, serde_json::to_string(&body)?],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::Conflict(format!(
                    "{} document {} violates a unique index",
                    collection.as_str(),
                    id
                ))
            } else {
                e.into()
            }
        })?;
        tx.commit()?;

        Ok(Some(Document {
            id: id.to_string(),
            body,
        }))
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id],
        )?;
        Ok(rows > 0)
    }
}
