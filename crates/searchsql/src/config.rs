//! Session configuration handed to the compiler and executor.
//!
//! ## Configuration
//!
//! | Key                | Description                                  | Default                 |
//! |--------------------|----------------------------------------------|-------------------------|
//! | `connection.url`   | Search engine base URL                       | `http://localhost:9200` |
//! | `fetch.size`       | Max distinct keys per terms bucket / hits    | `10000`                 |
//! | `default.interval` | Histogram interval when none parses (ms)     | `8640000`               |
//! | `query.timeout_ms` | Engine call timeout                          | `10000`                 |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SqlError;
use crate::interval::DEFAULT_INTERVAL_MS;
use crate::Result;

fn default_endpoint() -> String {
    "http://localhost:9200".to_string()
}

fn default_fetch_size() -> usize {
    10_000
}

fn default_interval_ms() -> i64 {
    DEFAULT_INTERVAL_MS
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Per-session settings. Passed explicitly; nothing is read from globals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the search engine.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Size of every terms bucket and the cap on returned hits.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// Histogram interval used when a literal cannot be parsed.
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: i64,

    /// Timeout around a single engine request.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            fetch_size: default_fetch_size(),
            default_interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl SessionConfig {
    /// Parse a SessionConfig from a string key-value map.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let endpoint = config
            .get("connection.url")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(default_endpoint);

        let fetch_size = config
            .get("fetch.size")
            .map(|s| {
                s.parse::<usize>()
                    .map_err(|e| SqlError::Config(format!("invalid fetch.size: {}", e)))
            })
            .transpose()?
            .unwrap_or_else(default_fetch_size);

        let default_interval_ms = config
            .get("default.interval")
            .map(|s| {
                s.parse::<i64>()
                    .map_err(|e| SqlError::Config(format!("invalid default.interval: {}", e)))
            })
            .transpose()?
            .unwrap_or_else(default_interval_ms);

        let timeout_ms = config
            .get("query.timeout_ms")
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|e| SqlError::Config(format!("invalid query.timeout_ms: {}", e)))
            })
            .transpose()?
            .unwrap_or_else(default_timeout_ms);

        Ok(SessionConfig {
            endpoint,
            fetch_size,
            default_interval_ms,
            timeout_ms,
        })
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}
