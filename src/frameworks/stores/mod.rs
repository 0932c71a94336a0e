// Store backends and their shared pieces.

pub mod filter;
pub mod memory;
pub mod postgres;
pub mod router;

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::domain::{Store, StoreError};
use crate::frameworks::{config, db};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Selects the backend from the environment: Postgres when DATABASE_URL
/// is set, the in-memory store otherwise.
pub async fn from_env(shutdown: watch::Receiver<bool>) -> Result<Arc<dyn Store>, StoreError> {
    match config::database_url() {
        Some(url) => {
            let pool = db::connect_pool(&url).await?;
            db::run_migrations(&pool)
                .await
                .map_err(|err| StoreError::Database(err.into()))?;
            info!("using postgres store");
            Ok(PostgresStore::new(pool, shutdown))
        }
        None => {
            info!("no DATABASE_URL set, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

// Lobby passwords are stored as bcrypt hashes only; the verify below is
// the constant-time comparison from the bcrypt crate.

fn bcrypt_cost() -> u32 {
    if config::is_test_env() {
        // Minimum cost bcrypt accepts; keeps test runs fast.
        4
    } else {
        bcrypt::DEFAULT_COST
    }
}

pub(crate) fn hash_password(password: &str) -> Result<String, StoreError> {
    Ok(bcrypt::hash(password, bcrypt_cost())?)
}

pub(crate) fn verify_password(password: &str, hash: &str) -> Result<bool, StoreError> {
    Ok(bcrypt::verify(password, hash)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hashing_round_trip() {
        std::env::set_var("ENV", "test");
        let hash = hash_password("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3", &hash).unwrap());
    }
}
