//! Target executors.
//!
//! One executor per orchestration backend, each exposing the same
//! restart / scale / rollout-restart contract. Every operation is idempotent
//! at the orchestration-API level: repeating a restart on an
//! already-restarted target is a no-op success, not an error. Adding a
//! platform means adding an executor, never branching on string fields.

pub mod cloud_run;
pub mod kubernetes;
pub mod mock;

pub use cloud_run::CloudRunExecutor;
pub use kubernetes::KubernetesExecutor;
pub use mock::MockExecutor;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ExecutorError;
use crate::types::{Platform, ScaleSpec, ServiceTarget};

/// Result of a single executor operation.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Whether the backend accepted the operation
    pub success: bool,
    /// Human-readable outcome description
    pub message: String,
}

impl ExecOutcome {
    /// Successful outcome with a message.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Uniform contract over orchestration backends.
#[async_trait]
pub trait TargetExecutor: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Force replacement of all running instances without changing the
    /// desired instance count.
    async fn restart(
        &self,
        target: &ServiceTarget,
        reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError>;

    /// Adjust the instance count (fixed replicas or autoscaling bounds,
    /// depending on the backend).
    async fn scale(
        &self,
        target: &ServiceTarget,
        spec: ScaleSpec,
        reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError>;

    /// Zero-downtime sequential replacement of all instances.
    /// Not every backend supports this.
    async fn rollout_restart(
        &self,
        target: &ServiceTarget,
        reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError>;
}

/// Stand-in for a backend whose client could not be constructed at startup.
/// Every operation fails as unreachable, so actions against the backend are
/// recorded as failures instead of crashing the process.
pub struct UnavailableExecutor {
    backend: &'static str,
    reason: String,
}

impl UnavailableExecutor {
    /// Create a stand-in for the named backend.
    #[must_use]
    pub fn new(backend: &'static str, reason: impl Into<String>) -> Self {
        Self {
            backend,
            reason: reason.into(),
        }
    }

    fn unreachable(&self) -> ExecutorError {
        ExecutorError::Unreachable(format!("{} backend unavailable: {}", self.backend, self.reason))
    }
}

#[async_trait]
impl TargetExecutor for UnavailableExecutor {
    fn name(&self) -> &'static str {
        self.backend
    }

    async fn restart(
        &self,
        _target: &ServiceTarget,
        _reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError> {
        Err(self.unreachable())
    }

    async fn scale(
        &self,
        _target: &ServiceTarget,
        _spec: ScaleSpec,
        _reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError> {
        Err(self.unreachable())
    }

    async fn rollout_restart(
        &self,
        _target: &ServiceTarget,
        _reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError> {
        Err(self.unreachable())
    }
}

/// Executor lookup by platform: the `{action type} x {platform}` dispatch
/// resolves through this set, one implementation per platform variant.
#[derive(Clone)]
pub struct ExecutorSet {
    kubernetes: Arc<dyn TargetExecutor>,
    cloud_run: Arc<dyn TargetExecutor>,
}

impl ExecutorSet {
    /// Build a set from per-platform executors.
    #[must_use]
    pub fn new(kubernetes: Arc<dyn TargetExecutor>, cloud_run: Arc<dyn TargetExecutor>) -> Self {
        Self {
            kubernetes,
            cloud_run,
        }
    }

    /// Use one executor for every platform (tests).
    #[must_use]
    pub fn uniform(executor: Arc<dyn TargetExecutor>) -> Self {
        Self {
            kubernetes: executor.clone(),
            cloud_run: executor,
        }
    }

    /// Resolve the executor for a platform.
    #[must_use]
    pub fn for_platform(&self, platform: Platform) -> &Arc<dyn TargetExecutor> {
        match platform {
            Platform::Kubernetes => &self.kubernetes,
            Platform::CloudRun => &self.cloud_run,
        }
    }
}
