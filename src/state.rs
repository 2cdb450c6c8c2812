use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mockcloud::{CloudState, MockCloud};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Persisted mock cloud between invocations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// Last time the state was saved
    pub last_updated: DateTime<Utc>,

    #[serde(default)]
    pub cloud: CloudState,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            last_updated: Utc::now(),
            cloud: CloudState::default(),
        }
    }
}

impl StateFile {
    /// Load state from disk, or return an empty cloud if the file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file {} does not exist, starting empty", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!(
            "Loaded state from {} (saved {})",
            path.display(),
            state.last_updated
        );
        Ok(state)
    }

    /// Capture `cloud`, stamp the time and write to disk
    pub fn save(&mut self, path: &Path, cloud: &MockCloud) -> Result<()> {
        self.cloud = cloud.snapshot();
        self.last_updated = Utc::now();

        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize state to JSON")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    /// A provider over a copy of the loaded state
    pub fn cloud(&self) -> MockCloud {
        MockCloud::from_state(self.cloud.clone())
    }
}
