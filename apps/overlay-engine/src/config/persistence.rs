//! Persistence configuration.

use serde::{Deserialize, Serialize};

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path to the turso database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Apply schema migrations on startup.
    #[serde(default = "default_migrate_on_start")]
    pub migrate_on_start: bool,
}

fn default_db_path() -> String {
    "overlay.db".to_string()
}

const fn default_migrate_on_start() -> bool {
    true
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            migrate_on_start: default_migrate_on_start(),
        }
    }
}
