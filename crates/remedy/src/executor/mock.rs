//! Deterministic in-memory executor for tests.
//!
//! Records every invocation and supports scripted failures and hangs per
//! service, so dispatcher behavior (retries, timeouts, single-flight) can be
//! exercised without any network access.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{ExecOutcome, TargetExecutor};
use crate::error::ExecutorError;
use crate::types::{ScaleSpec, ServiceTarget};

/// One recorded executor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: &'static str,
    pub service_name: String,
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    /// Services whose next N calls fail
    failures_remaining: HashMap<String, u32>,
    /// Services whose calls always fail
    always_fail: HashMap<String, String>,
    /// Services whose calls sleep before succeeding
    delays: HashMap<String, Duration>,
}

/// Scriptable fake backend.
#[derive(Default)]
pub struct MockExecutor {
    state: Mutex<MockState>,
}

impl MockExecutor {
    /// Create a mock that succeeds on every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls for a service, then succeed.
    #[must_use]
    pub fn with_transient_failures(self, service: &str, count: u32) -> Self {
        self.state
            .lock()
            .expect("mock state poisoned")
            .failures_remaining
            .insert(service.to_string(), count);
        self
    }

    /// Fail every call for a service with the given message.
    #[must_use]
    pub fn with_failure(self, service: &str, message: &str) -> Self {
        self.state
            .lock()
            .expect("mock state poisoned")
            .always_fail
            .insert(service.to_string(), message.to_string());
        self
    }

    /// Sleep before completing calls for a service.
    #[must_use]
    pub fn with_delay(self, service: &str, delay: Duration) -> Self {
        self.state
            .lock()
            .expect("mock state poisoned")
            .delays
            .insert(service.to_string(), delay);
        self
    }

    /// All recorded calls, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().expect("mock state poisoned").calls.clone()
    }

    /// Number of calls recorded for a service.
    #[must_use]
    pub fn call_count(&self, service: &str) -> usize {
        self.state
            .lock()
            .expect("mock state poisoned")
            .calls
            .iter()
            .filter(|c| c.service_name == service)
            .count()
    }

    async fn invoke(
        &self,
        operation: &'static str,
        target: &ServiceTarget,
        detail: String,
    ) -> Result<ExecOutcome, ExecutorError> {
        let delay = {
            let mut state = self.state.lock().expect("mock state poisoned");
            state.calls.push(MockCall {
                operation,
                service_name: target.service_name.clone(),
            });

            if let Some(message) = state.always_fail.get(&target.service_name) {
                return Err(ExecutorError::Unreachable(message.clone()));
            }

            if let Some(remaining) = state.failures_remaining.get_mut(&target.service_name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ExecutorError::Unreachable(format!(
                        "transient failure for {}",
                        target.service_name
                    )));
                }
            }

            state.delays.get(&target.service_name).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(ExecOutcome::ok(detail))
    }
}

#[async_trait]
impl TargetExecutor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn restart(
        &self,
        target: &ServiceTarget,
        _reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError> {
        self.invoke(
            "restart",
            target,
            format!("Restarted {} (mock)", target.service_name),
        )
        .await
    }

    async fn scale(
        &self,
        target: &ServiceTarget,
        spec: ScaleSpec,
        _reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError> {
        let detail = match spec {
            ScaleSpec::Fixed { replicas } => {
                format!("Scaled {} to {replicas} replicas (mock)", target.service_name)
            }
            ScaleSpec::Bounds {
                min_replicas,
                max_replicas,
            } => format!(
                "Scaled {} to bounds {min_replicas}..{max_replicas} (mock)",
                target.service_name
            ),
        };
        self.invoke("scale", target, detail).await
    }

    async fn rollout_restart(
        &self,
        target: &ServiceTarget,
        _reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError> {
        self.invoke(
            "rollout_restart",
            target,
            format!("Rollout restart of {} (mock)", target.service_name),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;

    fn target(service: &str) -> ServiceTarget {
        ServiceTarget {
            service_name: service.to_string(),
            platform: Platform::Kubernetes,
            cluster_or_region: "test".to_string(),
            namespace: None,
        }
    }

    #[tokio::test]
    async fn test_restart_is_idempotent() {
        let mock = MockExecutor::new();

        let first = mock.restart(&target("user-auth"), None).await.unwrap();
        let second = mock.restart(&target("user-auth"), None).await.unwrap();

        assert!(first.success);
        assert!(second.success);
        assert_eq!(mock.call_count("user-auth"), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let mock = MockExecutor::new().with_transient_failures("user-auth", 2);

        assert!(mock.restart(&target("user-auth"), None).await.is_err());
        assert!(mock.restart(&target("user-auth"), None).await.is_err());
        assert!(mock.restart(&target("user-auth"), None).await.is_ok());
    }
}
