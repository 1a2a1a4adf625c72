use rand::Rng;

use crate::db::models::Credentials;

pub const DEFAULT_COST: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Derives and checks bcrypt credentials. The work runs on tokio's blocking
/// pool so request tasks are never stalled by the hash.
#[derive(Debug, Clone, Copy)]
pub struct CredentialManager {
    cost: u32,
}

impl Default for CredentialManager {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl CredentialManager {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash `plaintext` with a fresh random salt.
    pub async fn hash(&self, plaintext: &str) -> Result<Credentials, CredentialError> {
        let cost = self.cost;
        let plaintext = plaintext.to_owned();

        let parts = tokio::task::spawn_blocking(move || {
            let salt: [u8; 16] = rand::thread_rng().gen();
            bcrypt::hash_with_salt(plaintext.as_bytes(), cost, salt)
        })
        .await??;

        Ok(Credentials {
            salt: parts.get_salt(),
            hash: parts.format_for_version(bcrypt::Version::TwoB),
        })
    }

    /// Check `plaintext` against stored credentials. Mismatches and malformed
    /// hashes are both just `false`.
    pub async fn verify(&self, plaintext: &str, stored: &Credentials) -> bool {
        let plaintext = plaintext.to_owned();
        let hash = stored.hash.clone();

        tokio::task::spawn_blocking(move || bcrypt::verify(plaintext.as_bytes(), &hash))
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or(false)
    }
}
