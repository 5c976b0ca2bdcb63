//! Engine configuration.
//!
//! [`EngineConfig`] is constructed once at process start from environment
//! variables and passed by reference into each component; there is no
//! ambient global state. Targets and policy rules live in a JSON config
//! file (see [`FileConfig`]).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::policy::PolicyConfig;
use crate::types::ServiceTarget;

/// Immutable engine configuration, environment-driven.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the JSON config file (targets + policy)
    pub config_path: PathBuf,
    /// Address the HTTP server binds to
    pub listen_addr: String,
    /// Skip executor invocation, record actions as dry-run successes
    pub dry_run: bool,
    /// Maximum concurrent executor invocations
    pub max_concurrent_actions: usize,
    /// Per-attempt executor timeout in seconds
    pub action_timeout_secs: u64,
    /// Base backoff between retry attempts in milliseconds
    pub retry_backoff_ms: u64,
    /// Upper bound accepted for any replica count
    pub max_replicas_ceiling: u32,
    /// Age past which a non-terminal record is force-failed
    pub stale_grace_secs: u64,
    /// Namespace used for Kubernetes targets that do not set one
    pub default_namespace: String,
    /// Region used for Cloud Run targets that do not set one
    pub default_region: String,
    /// GCP project id (required by the Cloud Run executor)
    pub gcp_project_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("remedy-config.json"),
            listen_addr: "0.0.0.0:8003".to_string(),
            dry_run: false,
            max_concurrent_actions: 5,
            action_timeout_secs: 300,
            retry_backoff_ms: 500,
            max_replicas_ceiling: 1000,
            stale_grace_secs: 300,
            default_namespace: "default".to_string(),
            default_region: "us-central1".to_string(),
            gcp_project_id: None,
        }
    }
}

impl EngineConfig {
    /// Build the configuration from environment variables, falling back to
    /// defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            config_path: env_var("REMEDY_CONFIG").map_or(defaults.config_path, PathBuf::from),
            listen_addr: env_var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            dry_run: env_flag("DRY_RUN_MODE"),
            max_concurrent_actions: env_parsed(
                "MAX_CONCURRENT_ACTIONS",
                defaults.max_concurrent_actions,
            ),
            action_timeout_secs: env_parsed("ACTION_TIMEOUT_SECONDS", defaults.action_timeout_secs),
            retry_backoff_ms: env_parsed("RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            max_replicas_ceiling: env_parsed("MAX_REPLICAS_CEILING", defaults.max_replicas_ceiling),
            stale_grace_secs: env_parsed("STALE_ACTION_GRACE_SECS", defaults.stale_grace_secs),
            default_namespace: env_var("DEFAULT_NAMESPACE").unwrap_or(defaults.default_namespace),
            default_region: env_var("DEFAULT_REGION").unwrap_or(defaults.default_region),
            gcp_project_id: env_var("GCP_PROJECT_ID"),
        }
    }
}

/// On-disk configuration: target registry entries plus policy rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    /// Service deployment coordinates
    #[serde(default)]
    pub targets: Vec<ServiceTarget>,
    /// Policy engine configuration
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl FileConfig {
    /// Load and parse the config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults() {
        std::env::remove_var("MAX_CONCURRENT_ACTIONS");
        std::env::remove_var("DRY_RUN_MODE");
        let config = EngineConfig::from_env();
        assert_eq!(config.max_concurrent_actions, 5);
        assert_eq!(config.action_timeout_secs, 300);
        assert_eq!(config.stale_grace_secs, 300);
        assert!(!config.dry_run);
        assert_eq!(config.default_namespace, "default");
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("MAX_CONCURRENT_ACTIONS", "9");
        std::env::set_var("DRY_RUN_MODE", "true");
        let config = EngineConfig::from_env();
        assert_eq!(config.max_concurrent_actions, 9);
        assert!(config.dry_run);
        std::env::remove_var("MAX_CONCURRENT_ACTIONS");
        std::env::remove_var("DRY_RUN_MODE");
    }

    #[test]
    fn test_file_config_parses() {
        let raw = r#"{
            "targets": [
                {
                    "service_name": "payment-api",
                    "platform": "gke",
                    "cluster_or_region": "prod-cluster",
                    "namespace": "payments"
                },
                {
                    "service_name": "report-builder",
                    "platform": "cloud_run",
                    "cluster_or_region": "us-central1"
                }
            ],
            "policy": {
                "min_score": 0.5,
                "require_approval_for_critical": true,
                "rules": {
                    "critical": {"action": "restart"},
                    "high": {"action": "scale", "scale": {"replicas": 4}}
                }
            }
        }"#;

        let config: FileConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.targets.len(), 2);
        assert!(config.policy.require_approval_for_critical);
        assert_eq!(config.policy.rules.len(), 2);
    }
}
