//! Sample keys and temporary config files for tests.

use crate::config::AggregatorConfig;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// A handful of region ids, the most common batch key.
#[must_use]
pub fn sample_zones() -> Vec<String> {
    ["us-east-1", "us-west-2", "eu-west-1", "eu-central-1", "ap-southeast-2"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Org names as used by vCloud-style providers.
#[must_use]
pub fn sample_orgs() -> Vec<String> {
    ["engineering", "finance", "marketing"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// A JSON config file that is deleted when dropped.
pub struct TempConfigFile {
    file: NamedTempFile,
}

impl TempConfigFile {
    /// Write `json` verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created or written.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .context("create temporary config file")?;
        file.write_all(json.as_bytes())
            .context("write temporary config file")?;
        file.flush().context("flush temporary config file")?;
        Ok(Self { file })
    }

    /// Serialize `config` into a fresh file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails.
    pub fn new(config: &AggregatorConfig) -> Result<Self> {
        let json = serde_json::to_string_pretty(config).context("serialize aggregator config")?;
        Self::from_json(&json)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
