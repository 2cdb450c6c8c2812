//! Settings file and path resolution
//!
//! Settings live in `<config dir>/cloudup/config.toml` unless `--config` or
//! `CLOUDUP_CONFIG` points elsewhere. A missing default file means defaults;
//! a missing explicit file is an error. Command-line flags override values
//! read here.

use anyhow::{Context, Result};
use converge::RunOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Maximum number of tasks running at once
    pub workers: Option<usize>,
    /// Per-run wall-clock budget
    pub timeout_secs: Option<u64>,
    pub tolerate_skipped_dependencies: bool,
    pub block_on_tainted_dependencies: bool,
    pub warn_on_lifecycle_violation: bool,
    /// Mock cloud state file; `~` and environment variables are expanded
    pub state_file: Option<String>,
}

impl Settings {
    /// Default settings file path
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(dir.join("cloudup").join("config.toml"))
    }

    /// Load settings from `explicit`, or from the default path if present
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::default_path()?;
                if !path.exists() {
                    log::debug!("No settings file at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let settings = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Engine options, with `jobs` and `timeout_secs` from the command line
    /// taking precedence
    pub fn run_options(&self, jobs: Option<usize>, timeout_secs: Option<u64>) -> RunOptions {
        let defaults = RunOptions::default();
        RunOptions {
            workers: jobs.or(self.workers).unwrap_or(defaults.workers),
            tolerate_skipped_dependencies: self.tolerate_skipped_dependencies,
            block_on_tainted_dependencies: self.block_on_tainted_dependencies,
            warn_on_lifecycle_violation: self.warn_on_lifecycle_violation,
            timeout: timeout_secs.or(self.timeout_secs).map(Duration::from_secs),
        }
    }

    /// Where the mock cloud state lives
    ///
    /// Priority: `--state` / `CLOUDUP_STATE`, then `state_file`, then
    /// `<local data dir>/cloudup/cloud.json`.
    pub fn state_path(&self, flag: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = flag {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = &self.state_file {
            return Ok(expand(path));
        }
        let dir = dirs::data_local_dir().context("Could not determine local data directory")?;
        Ok(dir.join("cloudup").join("cloud.json"))
    }
}

/// Expand `~` and environment variables in a path string
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
