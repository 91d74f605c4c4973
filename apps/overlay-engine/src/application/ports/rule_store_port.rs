//! Rule Store Port (Driven Port)
//!
//! The engine only reads rules; authoring CRUD lives outside the core.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::StoreError;
use crate::domain::Rule;

/// Port for reading stored override rules.
#[async_trait]
pub trait RuleStorePort: Send + Sync {
    /// All rules of a use case.
    async fn find_for_use_case(&self, use_case_id: &str) -> Result<Vec<Rule>, StoreError>;

    /// The rule for one `(use_case, node)` pair, if any.
    async fn find(&self, use_case_id: &str, node_id: &str) -> Result<Option<Rule>, StoreError>;

    /// Most recent rule edit for a use case; drives result staleness.
    async fn latest_modification(
        &self,
        use_case_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// In-memory implementation for tests.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    // Keyed by (use_case_id, node_id): at most one rule per pair.
    rules: std::sync::RwLock<HashMap<(String, String), Rule>>,
}

impl InMemoryRuleStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the rule for its `(use_case, node)` pair.
    pub fn upsert(&self, rule: Rule) {
        let mut rules = self
            .rules
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        rules.insert((rule.use_case_id.clone(), rule.node_id.clone()), rule);
    }
}

#[async_trait]
impl RuleStorePort for InMemoryRuleStore {
    async fn find_for_use_case(&self, use_case_id: &str) -> Result<Vec<Rule>, StoreError> {
        let rules = self
            .rules
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut found: Vec<Rule> = rules
            .iter()
            .filter(|((uc, _), _)| uc == use_case_id)
            .map(|(_, rule)| rule.clone())
            .collect();
        found.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(found)
    }

    async fn find(&self, use_case_id: &str, node_id: &str) -> Result<Option<Rule>, StoreError> {
        let rules = self
            .rules
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(rules
            .get(&(use_case_id.to_string(), node_id.to_string()))
            .cloned())
    }

    async fn latest_modification(
        &self,
        use_case_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let rules = self
            .rules
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(rules
            .iter()
            .filter(|((uc, _), _)| uc == use_case_id)
            .map(|(_, rule)| rule.last_modified_at)
            .max())
    }
}
