//! Service target registry.
//!
//! Maps a service name to its deployment coordinates. Read-mostly: lookups
//! take a read lock, and an out-of-band reload replaces the whole map under
//! a write lock (atomic reload-and-swap).

use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::FileConfig;
use crate::types::ServiceTarget;

/// Registry of service deployment targets.
pub struct TargetRegistry {
    path: Option<PathBuf>,
    targets: RwLock<HashMap<String, ServiceTarget>>,
}

impl TargetRegistry {
    /// Build a registry from a loaded config file, remembering the path for
    /// later reloads.
    #[must_use]
    pub fn from_file(path: PathBuf, config: &FileConfig) -> Self {
        Self {
            path: Some(path),
            targets: RwLock::new(index_targets(&config.targets)),
        }
    }

    /// Build a registry from a fixed target list (tests, embedding).
    #[must_use]
    pub fn from_targets(targets: Vec<ServiceTarget>) -> Self {
        Self {
            path: None,
            targets: RwLock::new(index_targets(&targets)),
        }
    }

    /// Look up the deployment target for a service.
    pub async fn resolve(&self, service_name: &str) -> Option<ServiceTarget> {
        self.targets.read().await.get(service_name).cloned()
    }

    /// Number of registered services.
    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }

    /// Whether the registry has no entries.
    pub async fn is_empty(&self) -> bool {
        self.targets.read().await.is_empty()
    }

    /// Re-read the config file and swap in the new target map.
    ///
    /// Returns the number of targets after the reload.
    pub async fn reload(&self) -> Result<usize> {
        let Some(path) = &self.path else {
            anyhow::bail!("Registry has no backing file to reload from");
        };

        let config = FileConfig::load(path)?;
        let next = index_targets(&config.targets);
        let count = next.len();

        *self.targets.write().await = next;
        info!(targets = count, "Target registry reloaded");

        Ok(count)
    }
}

fn index_targets(targets: &[ServiceTarget]) -> HashMap<String, ServiceTarget> {
    targets
        .iter()
        .map(|t| (t.service_name.clone(), t.clone()))
        .collect()
}
