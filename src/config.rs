//! Configuration for the indexer, the query engine and the range cache.
//!
//! # Example
//!
//! ```
//! use sealdex::config::SealdexConfig;
//!
//! let config = SealdexConfig::from_json_str(r#"{ "max_row_postings": 500 }"#).unwrap();
//! assert_eq!(config.max_row_postings, 500);
//! assert_eq!(config.leading_row_budget, 1000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SealdexError};

/// Tuning knobs shared by all components of a [`crate::context::SearchContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealdexConfig {
    /// Number of postings a search index row may hold before it is split.
    pub max_row_postings: usize,

    /// Posting budget consumed from the leading metadata row per query page.
    pub leading_row_budget: usize,

    /// Page size for remote range loads.
    pub load_multiple_limit: usize,

    /// Fixed backoff between index initialization attempts, in milliseconds.
    pub init_retry_delay_ms: u64,

    /// Number of days the mail index initially covers.
    pub initial_mail_index_interval_days: i64,

    /// Concurrent element data lookups while resolving search results.
    pub result_lookup_concurrency: usize,

    /// Batch ids remembered per group to drop re-delivered batches.
    pub max_remembered_batches: usize,
}

impl Default for SealdexConfig {
    fn default() -> Self {
        SealdexConfig {
            max_row_postings: 1000,
            leading_row_budget: 1000,
            load_multiple_limit: 100,
            init_retry_delay_ms: 30_000,
            initial_mail_index_interval_days: 28,
            result_lookup_concurrency: 5,
            max_remembered_batches: 1000,
        }
    }
}

impl SealdexConfig {
    /// Parse a configuration from JSON. Missing fields take their default.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SealdexConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_row_postings < 2 {
            return Err(SealdexError::invalid_config(
                "max_row_postings must be at least 2",
            ));
        }
        if self.leading_row_budget == 0 {
            return Err(SealdexError::invalid_config(
                "leading_row_budget must be positive",
            ));
        }
        if self.load_multiple_limit == 0 {
            return Err(SealdexError::invalid_config(
                "load_multiple_limit must be positive",
            ));
        }
        if self.result_lookup_concurrency == 0 {
            return Err(SealdexError::invalid_config(
                "result_lookup_concurrency must be positive",
            ));
        }
        Ok(())
    }

    /// Backoff between index initialization attempts.
    pub fn init_retry_delay(&self) -> Duration {
        Duration::from_millis(self.init_retry_delay_ms)
    }
}
