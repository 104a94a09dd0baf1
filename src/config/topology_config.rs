//! Static cluster layout
//!
//! Loaded from a JSON file and/or assembled from `--shard` / `--sentinel`
//! flags. Shards are kept in a sorted map so every run visits them in the
//! same order.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::cli::{parse_shard_arg, CliArgs};
use crate::client::Endpoint;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Shard name to member connection strings
    #[serde(default)]
    pub shards: BTreeMap<String, Vec<String>>,
    /// Sentinel connection strings
    #[serde(default)]
    pub sentinels: Vec<String>,
}

impl TopologyConfig {
    pub fn from_json(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("Invalid topology config: {}", e))
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::from_json(&text)
    }

    /// File contents (if `--config` was given) extended with the command
    /// line shards and Sentinels
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        for arg in &args.shards {
            let (name, urls) = parse_shard_arg(arg)?;
            if config.shards.contains_key(&name) {
                return Err(format!("Duplicate shard name '{}'", name));
            }
            config.shards.insert(name, urls);
        }
        config.sentinels.extend(args.sentinels.iter().cloned());

        config.validate()?;
        Ok(config)
    }

    /// Reject layouts that can never work before any connection is made
    pub fn validate(&self) -> Result<(), String> {
        if self.shards.is_empty() && self.sentinels.is_empty() {
            return Err("No shards or sentinels configured".to_string());
        }

        for (name, urls) in &self.shards {
            if name.is_empty() {
                return Err("Shard with empty name".to_string());
            }
            if urls.is_empty() {
                return Err(format!("Shard '{}' has no members", name));
            }
            for url in urls {
                Endpoint::parse(url).map_err(|e| format!("Shard '{}': {}", name, e))?;
            }
        }

        for url in &self.sentinels {
            Endpoint::parse(url).map_err(|e| format!("Sentinel: {}", e))?;
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| e.to_string())
    }
}
