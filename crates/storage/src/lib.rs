//! Job and repository persistence.
//!
//! [`JobStore`] and [`RepoStore`] have a PostgreSQL implementation and an
//! in-memory one; [`open_stores`] picks between them from config.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

use std::sync::Arc;

use tracing::info;

use intake_core::config::PostgresConfig;

pub use error::StoreError;
pub use memory::{MemoryJobStore, MemoryRepoStore};
pub use postgres::{init_pg_pool, PgJobStore, PgRepoStore};
pub use traits::{JobStore, RepoStore};

/// The pair of stores every role works against.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub repos: Arc<dyn RepoStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            jobs: Arc::new(MemoryJobStore::new()),
            repos: Arc::new(MemoryRepoStore::new()),
        }
    }
}

/// Open the configured backend (`STORE_BACKEND=postgres|memory`).
pub async fn open_stores(config: &PostgresConfig) -> Result<Stores, StoreError> {
    match config.backend.as_str() {
        "memory" => {
            info!("Using in-memory stores (data is lost on exit)");
            Ok(Stores::memory())
        }
        "postgres" => {
            let pool = init_pg_pool(config).await?;
            Ok(Stores {
                jobs: Arc::new(PgJobStore::new(pool.clone())),
                repos: Arc::new(PgRepoStore::new(pool)),
            })
        }
        other => Err(StoreError::Invalid(format!("unknown store backend: {other}"))),
    }
}
