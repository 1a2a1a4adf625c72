use std::path::PathBuf;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::credentials::CredentialManager;
use crate::auth::session::{build_strategy, SessionStrategy};
use crate::auth::signing::Signer;
use crate::config::Config;
use crate::db::{Posts, Users};
use crate::store::DocumentStore;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub users: Users,
    pub posts: Posts,
    pub sessions: Arc<dyn SessionStrategy>,
    pub config: Config,
    pub uploads_dir: PathBuf,
}

impl AppState {
    /// Wire repositories and the configured session strategy over `store`.
    pub fn new(config: Config, store: Arc<dyn DocumentStore>) -> Self {
        let signer = match config.auth.secret.as_deref() {
            Some(secret) => Signer::new(secret),
            None => {
                tracing::warn!(
                    "No signing secret configured; sessions will not survive a restart"
                );
                Signer::generate()
            }
        };

        let credentials = CredentialManager::new(config.auth.bcrypt_cost);
        Self {
            users: Users::new(store.clone(), credentials),
            posts: Posts::new(store),
            sessions: build_strategy(&config.auth, signer),
            uploads_dir: config.uploads_path(),
            config,
        }
    }
}
