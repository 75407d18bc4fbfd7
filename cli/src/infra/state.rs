//! Infrastructure implementation of the `PanelStateStore` port.
//!
//! `JsonPanelStateStore` provides async load/save using `tokio::task::spawn_blocking`
//! with atomic write (temp file + rename) so a crash never leaves a torn file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use leasekeeper_common::PanelState;

use crate::application::ports::PanelStateStore;

/// Panel pointer file: implements `PanelStateStore` for the infra layer.
pub struct JsonPanelStateStore {
    path: PathBuf,
}

impl JsonPanelStateStore {
    /// Create a store using the default path (`~/.leasekeeper/panel.json`).
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self::with_path(home.join(".leasekeeper").join("panel.json")))
    }

    /// Create a store with an explicit path (config override and tests).
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_sync(path: &Path) -> Result<Option<PanelState>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading panel state {}", path.display()))?;
        let state: PanelState = serde_json::from_str(&content)
            .with_context(|| format!("parsing panel state {}", path.display()))?;
        Ok(Some(state))
    }

    fn save_sync(path: &Path, state: &PanelState) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(state).context("serializing panel state")?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("setting permissions on {}", temp_path.display()))?;
        }

        std::fs::rename(&temp_path, path)
            .with_context(|| format!("finalizing panel state {}", path.display()))?;
        Ok(())
    }
}

impl PanelStateStore for JsonPanelStateStore {
    async fn load_async(&self) -> Result<Option<PanelState>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::load_sync(&path))
            .await
            .context("panel state load task panicked")?
    }

    async fn save_async(&self, state: &PanelState) -> Result<()> {
        let path = self.path.clone();
        let state = state.clone();
        tokio::task::spawn_blocking(move || Self::save_sync(&path, &state))
            .await
            .context("panel state save task panicked")?
    }
}
