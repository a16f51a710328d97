//! Runtime configuration and rules-file loading.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::rules::Rule;

/// Relay runtime configuration. Populated from environment variables in
/// the binary; defaults suit local runs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,
    /// Path of the JSON rules file.
    pub rules_path: PathBuf,
    /// Directory holding the checkpoint file.
    pub checkpoint_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            rules_path: PathBuf::from("./rules.json"),
            checkpoint_dir: PathBuf::from("./data"),
        }
    }
}

/// Load the ordered rule list from a JSON file.
pub fn load_rules(path: &Path) -> Result<Vec<Rule>, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
