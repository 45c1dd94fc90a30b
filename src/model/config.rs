use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration from optimist.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key the whole collection is stored under
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Artificial round-trip delay applied to every store operation
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            namespace: default_namespace(),
            latency_ms: default_latency_ms(),
        }
    }
}

impl StoreConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by OPTIMIST_LOG
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: default_log_filter(),
        }
    }
}

fn default_namespace() -> String {
    "todo.tasks.v1".to_string()
}

fn default_latency_ms() -> u64 {
    220
}

fn default_log_filter() -> String {
    "warn".to_string()
}
