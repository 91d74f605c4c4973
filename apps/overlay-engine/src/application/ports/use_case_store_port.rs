//! Use Case Store Port (Driven Port)

use std::collections::HashMap;

use async_trait::async_trait;

use super::StoreError;
use crate::domain::UseCase;

/// Port for reading use cases.
#[async_trait]
pub trait UseCaseStorePort: Send + Sync {
    /// Look up a use case by id.
    async fn find(&self, id: &str) -> Result<Option<UseCase>, StoreError>;
}

/// In-memory implementation for tests.
#[derive(Debug, Default)]
pub struct InMemoryUseCaseStore {
    use_cases: std::sync::RwLock<HashMap<String, UseCase>>,
}

impl InMemoryUseCaseStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a use case.
    pub fn insert(&self, use_case: UseCase) {
        let mut use_cases = self
            .use_cases
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        use_cases.insert(use_case.id.clone(), use_case);
    }
}

#[async_trait]
impl UseCaseStorePort for InMemoryUseCaseStore {
    async fn find(&self, id: &str) -> Result<Option<UseCase>, StoreError> {
        let use_cases = self
            .use_cases
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(use_cases.get(id).cloned())
    }
}
