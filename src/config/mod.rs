//! Sync configuration
//!
//! Loaded from a TOML file or built in code. Passed explicitly to the
//! orchestrator; there is no process-wide config singleton, so concurrent
//! runs with different settings stay independent.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, SyncError};
use crate::services::sync::helpers::backoff::RetryPolicy;

/// How deep the identity resolution cascade may go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionDepth {
    /// Consult only the local mapping store (and synthesis/fallback)
    StoreOnly,
    /// Also query the external directory service
    #[default]
    Directory,
}

/// Top-level sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// SQLite database location
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Pause between account starts, respecting upstream rate limits
    #[serde(default = "default_account_pause_ms")]
    pub account_pause_ms: u64,

    /// Bounded worker pool for accounts; 1 means strictly sequential
    #[serde(default = "default_account_concurrency")]
    pub max_account_concurrency: usize,

    /// Whether resolution may query the external directory
    #[serde(default)]
    pub resolution_depth: ResolutionDepth,

    /// Retry behavior for transient upstream errors
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Confidence floor below which participant display names are hidden
    #[serde(default = "default_min_display_confidence")]
    pub min_display_confidence: u8,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            db_path: default_db_path(),
            account_pause_ms: default_account_pause_ms(),
            max_account_concurrency: default_account_concurrency(),
            resolution_depth: ResolutionDepth::default(),
            retry: RetryPolicy::default(),
            min_display_confidence: default_min_display_confidence(),
        }
    }
}

impl SyncConfig {
    /// Load settings from a TOML file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<SyncConfig> {
        info!("Loading sync configuration from: {:?}", path);

        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("Failed to read config: {}", e)))?;

        let config: SyncConfig = toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("convosync.db")
}

fn default_account_pause_ms() -> u64 {
    1000
}

fn default_account_concurrency() -> usize {
    1
}

fn default_min_display_confidence() -> u8 {
    40
}
