//! Dependency wiring: build the store bundle from configuration.

use std::sync::Arc;

use crate::application::Stores;
use crate::application::ports::StoreError;
use crate::config::Config;
use crate::infrastructure::cache::{CachedHierarchyStore, CachedRuleStore, DEFAULT_CACHE_TTL};
use crate::infrastructure::persistence::{
    Database, TursoFactStore, TursoHierarchyStore, TursoResultStore, TursoRuleStore,
    TursoUseCaseStore,
};

/// The wired application: turso-backed stores behind their ports.
pub struct Container {
    /// Store bundle for the use cases.
    pub stores: Stores,
    /// Shared database handle (seeding, admin tooling).
    pub db: Arc<Database>,
}

impl Container {
    /// Open the database, apply migrations when configured, and wire the
    /// stores (hierarchies and rules behind TTL caches).
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the database cannot be opened or
    /// migrated.
    pub async fn from_config(config: &Config) -> Result<Self, StoreError> {
        let db = Arc::new(Database::open(&config.persistence.db_path).await?);
        if config.persistence.migrate_on_start {
            db.migrate().await?;
        }

        let stores = Stores {
            use_cases: Arc::new(TursoUseCaseStore::new(db.clone())),
            facts: Arc::new(TursoFactStore::new(db.clone())),
            hierarchies: Arc::new(CachedHierarchyStore::new(
                TursoHierarchyStore::new(db.clone()),
                DEFAULT_CACHE_TTL,
            )),
            rules: Arc::new(CachedRuleStore::new(
                TursoRuleStore::new(db.clone()),
                DEFAULT_CACHE_TTL,
            )),
            results: Arc::new(TursoResultStore::new(db.clone())),
        };
        Ok(Self { stores, db })
    }
}
