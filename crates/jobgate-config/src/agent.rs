//! Holds the current configuration and reloads it from disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::ConfigResult;
use crate::config::Config;

/// Shared, swappable configuration.
///
/// Readers take a cheap `Arc` snapshot; a reload replaces the snapshot only
/// when the new file parses and validates.
pub struct ConfigAgent {
    path: Option<PathBuf>,
    current: RwLock<Arc<Config>>,
}

impl ConfigAgent {
    pub fn new(config: Config) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub async fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let config = Config::load(&path).await?;
        info!(
            path = %path.display(),
            periodics = config.periodics.len(),
            repos = config.presubmits.len(),
            "Loaded configuration"
        );
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Arc<Config> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, config: Config) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    /// Re-read the file. On failure the current configuration stays.
    pub async fn reload(&self) -> ConfigResult<Arc<Config>> {
        let Some(path) = &self.path else {
            return Ok(self.config());
        };
        let config = Config::load(path).await?;
        self.set(config);
        info!(path = %path.display(), "Reloaded configuration");
        Ok(self.config())
    }

    /// Reload every `interval` until the task is aborted.
    pub fn spawn_reloader(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.reload().await {
                    warn!(error = %e, "Failed to reload configuration, keeping previous");
                }
            }
        })
    }
}
