pub mod models;
pub mod posts;
pub mod seed;
pub mod users;
pub mod validate;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use crate::db::models::Stored;
use crate::db::validate::{validate, validate_stored, Schema};
use crate::state::DbPool;
use crate::store::{Collection, DocumentStore, StoreError};

pub use posts::{NewPost, PostUpdate, Posts};
pub use users::{NewUser, UserUpdate, Users};

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_documents",
        include_str!("../../migrations/001_documents.sql"),
    ),
    (
        "002_unique_handle",
        include_str!("../../migrations/002_unique_handle.sql"),
    ),
];

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

/// Typed read-modify-write of one document. The body is strictly validated
/// before `f` sees it and serialized back afterwards, all inside the store's
/// per-document atomic update.
pub(crate) async fn modify<T, F>(
    store: &dyn DocumentStore,
    collection: Collection,
    id: &str,
    f: F,
) -> Result<Stored<T>, StoreError>
where
    T: Serialize + DeserializeOwned + Schema + Send + 'static,
    F: FnOnce(&mut T) -> Result<(), StoreError> + Send + 'static,
{
    let doc = store
        .update(
            collection,
            id,
            Box::new(move |body: &mut Value| {
                let mut record: T = validate(body.clone())?;
                f(&mut record)?;
                record.check()?;
                *body = serde_json::to_value(&record)?;
                Ok(())
            }),
        )
        .await?
        .ok_or(StoreError::NotFound)?;

    Ok(validate_stored(doc)?)
}
