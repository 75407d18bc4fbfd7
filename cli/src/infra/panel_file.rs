//! File-backed implementation of the `PanelPublisher` port.
//!
//! The panel is a text file inside a directory; the location's channel is
//! the directory and the message is the file stem. Writes are atomic so
//! readers tailing the file never see a half-written panel.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use leasekeeper_common::PanelLocation;

use crate::application::ports::PanelPublisher;

pub struct FilePanelPublisher {
    dir: PathBuf,
}

impl FilePanelPublisher {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Default directory (`~/.leasekeeper/panel`).
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn default_dir() -> Result<PathBuf> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(home.join(".leasekeeper").join("panel"))
    }

    fn file_for(dir: &Path, message_id: &str) -> PathBuf {
        dir.join(format!("{message_id}.txt"))
    }

    fn publish_sync(dir: &Path, location: Option<PanelLocation>, body: &str) -> Result<PanelLocation> {
        let channel_id = dir.display().to_string();
        // A location in another directory, or whose file was removed, is stale.
        let location = location
            .filter(|l| l.channel_id == channel_id && Self::file_for(dir, &l.message_id).exists())
            .unwrap_or_else(|| PanelLocation {
                channel_id,
                message_id: format!("panel-{}", Utc::now().format("%Y%m%d%H%M%S")),
            });

        std::fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir.display()))?;
        let path = Self::file_for(dir, &location.message_id);
        let temp_path = path.with_extension("txt.tmp");
        std::fs::write(&temp_path, body)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &path).with_context(|| format!("finalizing panel {}", path.display()))?;
        Ok(location)
    }
}

impl PanelPublisher for FilePanelPublisher {
    async fn publish(&self, location: Option<&PanelLocation>, body: &str) -> Result<PanelLocation> {
        let dir = self.dir.clone();
        let location = location.cloned();
        let body = body.to_string();
        tokio::task::spawn_blocking(move || Self::publish_sync(&dir, location, &body))
            .await
            .context("panel publish task panicked")?
    }
}
