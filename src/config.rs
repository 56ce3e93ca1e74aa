// src/config.rs

//! Orchestrator configuration
//!
//! Policy knobs only; everything here has a sensible default and nothing
//! is hardwired at call sites.

use serde::Deserialize;

/// Default metadata expiry: a refresh within the last 10 minutes is
/// considered recent enough to skip
fn default_refresh_expire() -> u64 {
    600
}

/// Default concurrency for bulk repo-tool fan-out
fn default_repo_concurrency() -> usize {
    4
}

/// Tunable policy for the operation queue
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Seconds after which cache/repository metadata counts as stale.
    /// Non-forced refresh operations inside this window complete
    /// immediately without contacting the backend.
    #[serde(default = "default_refresh_expire")]
    pub refresh_expire: u64,

    /// Maximum repo-tool calls in flight at once during bulk
    /// enable/disable/remove operations. Single-alias operations are
    /// serialized per alias regardless.
    #[serde(default = "default_repo_concurrency")]
    pub repo_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_expire: default_refresh_expire(),
            repo_concurrency: default_repo_concurrency(),
        }
    }
}

impl Config {
    /// Parse a configuration from a JSON document; missing fields keep
    /// their defaults
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.refresh_expire, 600);
        assert_eq!(config.repo_concurrency, 4);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json_str(r#"{"refresh_expire": 60}"#).unwrap();
        assert_eq!(config.refresh_expire, 60);
        assert_eq!(config.repo_concurrency, 4);
    }

    #[test]
    fn test_empty_json_is_all_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config.refresh_expire, 600);
    }
}
