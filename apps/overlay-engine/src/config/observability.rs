//! Observability configuration.

use serde::{Deserialize, Serialize};

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level / EnvFilter directive.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit compact single-line output instead of the full formatter.
    #[serde(default)]
    pub compact: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            compact: false,
        }
    }
}

/// Observability section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}
