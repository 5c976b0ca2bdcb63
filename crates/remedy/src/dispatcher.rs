//! Action dispatcher.
//!
//! Validates a request, acquires the single-flight lock by inserting a
//! pending ledger record, runs the platform executor with bounded retries
//! and timeouts, records the terminal state, and emits a best-effort
//! notification. Two concurrent dispatches for the same
//! `(service, action type)` key never both reach `running`; the loser is
//! rejected with a conflict, not queued.

use notify::{Notifier, NotifyEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, ExecutorError, LedgerError};
use crate::executor::{ExecOutcome, ExecutorSet};
use crate::ledger::ActionLedger;
use crate::types::{ActionRecord, ActionRequest, ActionStatus, ActionType, Platform, ScaleSpec};

/// Total executor attempts per dispatch: the first try plus two retries.
const MAX_ATTEMPTS: u32 = 3;

/// Longest accepted service name.
const MAX_SERVICE_NAME_LEN: usize = 100;

/// Longest accepted reason text.
const MAX_REASON_LEN: usize = 500;

/// Core dispatch engine.
pub struct ActionDispatcher {
    config: Arc<EngineConfig>,
    ledger: Arc<dyn ActionLedger>,
    executors: ExecutorSet,
    notifier: Arc<Notifier>,
    permits: Arc<Semaphore>,
}

impl ActionDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        config: Arc<EngineConfig>,
        ledger: Arc<dyn ActionLedger>,
        executors: ExecutorSet,
        notifier: Arc<Notifier>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_actions.max(1)));
        Self {
            config,
            ledger,
            executors,
            notifier,
            permits,
        }
    }

    /// Dispatch a remediation request and drive it to a terminal state.
    ///
    /// Validation and conflict errors surface to the caller before any
    /// executor work; executor failures are absorbed into the returned
    /// record's terminal state.
    pub async fn dispatch(&self, request: ActionRequest) -> Result<ActionRecord, EngineError> {
        self.validate(&request)?;

        let record = self.ledger.begin(request).await.map_err(|e| match e {
            LedgerError::KeyHeld {
                service,
                action_type,
            } => EngineError::Conflict {
                service,
                action_type,
            },
            other => EngineError::Ledger(other),
        })?;

        info!(
            action_id = %record.action_id,
            service = %record.request.service_name,
            action_type = %record.request.action_type,
            triggered_by = record.request.triggered_by.as_str(),
            "Dispatching action"
        );

        let record = self
            .ledger
            .transition(record.action_id, ActionStatus::Running, None)
            .await?;

        let (status, message) = self.execute_with_retries(&record).await;
        let record = self
            .ledger
            .transition(record.action_id, status, Some(message))
            .await?;

        info!(
            action_id = %record.action_id,
            status = %record.status,
            attempts = record.attempt_count,
            "Action completed"
        );

        self.notifier.notify(action_event(&record));

        Ok(record)
    }

    /// Validate a request. Rejections here never touch the ledger.
    fn validate(&self, request: &ActionRequest) -> Result<(), EngineError> {
        if request.service_name.is_empty() || request.service_name.len() > MAX_SERVICE_NAME_LEN {
            return Err(EngineError::Validation(format!(
                "service_name must be 1-{MAX_SERVICE_NAME_LEN} characters"
            )));
        }
        if request.reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::Validation(format!(
                "reason must be at most {MAX_REASON_LEN} characters"
            )));
        }

        let platform = request.target.platform;
        match request.action_type {
            ActionType::Restart => {
                if request.scale.is_some() {
                    return Err(EngineError::Validation(
                        "restart takes no scale parameters".to_string(),
                    ));
                }
            }
            ActionType::RolloutRestart => {
                if request.scale.is_some() {
                    return Err(EngineError::Validation(
                        "rollout_restart takes no scale parameters".to_string(),
                    ));
                }
                if platform != Platform::Kubernetes {
                    return Err(EngineError::Unsupported {
                        action_type: request.action_type,
                        platform,
                    });
                }
            }
            ActionType::Scale => self.validate_scale(request, platform)?,
        }

        Ok(())
    }

    fn validate_scale(
        &self,
        request: &ActionRequest,
        platform: Platform,
    ) -> Result<(), EngineError> {
        let ceiling = self.config.max_replicas_ceiling;
        let Some(spec) = request.scale else {
            return Err(EngineError::Validation(
                "scale requires replica parameters".to_string(),
            ));
        };

        match (platform, spec) {
            (Platform::Kubernetes, ScaleSpec::Fixed { replicas }) => {
                if replicas > ceiling {
                    return Err(EngineError::Validation(format!(
                        "replicas must be at most {ceiling}"
                    )));
                }
            }
            (Platform::Kubernetes, ScaleSpec::Bounds { .. }) => {
                return Err(EngineError::Validation(
                    "gke targets take a fixed replica count, not min/max bounds".to_string(),
                ));
            }
            (
                Platform::CloudRun,
                ScaleSpec::Bounds {
                    min_replicas,
                    max_replicas,
                },
            ) => {
                if max_replicas == 0 {
                    return Err(EngineError::Validation(
                        "max_replicas must be at least 1".to_string(),
                    ));
                }
                if max_replicas < min_replicas {
                    return Err(EngineError::Validation(
                        "max_replicas must be >= min_replicas".to_string(),
                    ));
                }
                if max_replicas > ceiling {
                    return Err(EngineError::Validation(format!(
                        "max_replicas must be at most {ceiling}"
                    )));
                }
            }
            (Platform::CloudRun, ScaleSpec::Fixed { .. }) => {
                return Err(EngineError::Validation(
                    "cloud_run targets take min/max autoscaling bounds, not a fixed count"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Run the executor with bounded retries and exponential backoff.
    /// Returns the terminal status and result message.
    async fn execute_with_retries(&self, record: &ActionRecord) -> (ActionStatus, String) {
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            if let Err(e) = self.ledger.bump_attempt(record.action_id).await {
                warn!(action_id = %record.action_id, error = %e, "Failed to record attempt");
            }

            match self.execute_once(&record.request).await {
                Ok(outcome) if outcome.success => {
                    return (ActionStatus::Succeeded, outcome.message);
                }
                Ok(outcome) => {
                    last_error = outcome.message;
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            warn!(
                action_id = %record.action_id,
                attempt,
                error = %last_error,
                "Executor attempt failed"
            );

            if attempt < MAX_ATTEMPTS {
                let backoff =
                    Duration::from_millis(self.config.retry_backoff_ms << (attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }

        (
            ActionStatus::Failed,
            format!("Exhausted {MAX_ATTEMPTS} attempts; last error: {last_error}"),
        )
    }

    /// One bounded executor invocation.
    async fn execute_once(&self, request: &ActionRequest) -> Result<ExecOutcome, ExecutorError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ExecutorError::Unreachable("dispatcher is shutting down".to_string()))?;

        if self.config.dry_run {
            return Ok(ExecOutcome::ok(format!(
                "Dry-run: {} on {} skipped",
                request.action_type, request.service_name
            )));
        }

        let executor = self.executors.for_platform(request.target.platform);
        let timeout = Duration::from_secs(self.config.action_timeout_secs);
        let reason = request.reason.as_deref();

        let operation = async {
            match request.action_type {
                ActionType::Restart => executor.restart(&request.target, reason).await,
                ActionType::Scale => {
                    // Validation guarantees the scale parameters are present
                    // and shaped for this platform.
                    let spec = request.scale.ok_or(ExecutorError::Unsupported)?;
                    executor.scale(&request.target, spec, reason).await
                }
                ActionType::RolloutRestart => {
                    executor.rollout_restart(&request.target, reason).await
                }
            }
        };

        match tokio::time::timeout(timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout {
                secs: timeout.as_secs(),
            }),
        }
    }
}

/// Build the notification payload for a completed action.
fn action_event(record: &ActionRecord) -> NotifyEvent {
    NotifyEvent::Action {
        action_id: record.action_id.to_string(),
        service_name: record.request.service_name.clone(),
        action_type: record.request.action_type.as_str().to_string(),
        status: record.status.as_str().to_string(),
        platform: record.request.target.platform.to_string(),
        reason: record
            .request
            .reason
            .clone()
            .unwrap_or_else(|| "unspecified".to_string()),
        triggered_by: record.request.triggered_by.as_str().to_string(),
        result: record.result_message.clone(),
        timestamp: record.completed_at.unwrap_or(record.created_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockExecutor;
    use crate::ledger::{HistoryFilter, MemoryLedger};
    use crate::types::{ServiceTarget, TriggeredBy};

    fn config() -> Arc<EngineConfig> {
        Arc::new(EngineConfig {
            action_timeout_secs: 1,
            retry_backoff_ms: 10,
            ..EngineConfig::default()
        })
    }

    fn target(service: &str, platform: Platform) -> ServiceTarget {
        ServiceTarget {
            service_name: service.to_string(),
            platform,
            cluster_or_region: "prod-cluster".to_string(),
            namespace: None,
        }
    }

    fn restart_request(service: &str) -> ActionRequest {
        ActionRequest {
            service_name: service.to_string(),
            action_type: ActionType::Restart,
            target: target(service, Platform::Kubernetes),
            reason: Some("test".to_string()),
            triggered_by: TriggeredBy::Manual,
            scale: None,
        }
    }

    fn dispatcher_with(mock: Arc<MockExecutor>, config: Arc<EngineConfig>) -> ActionDispatcher {
        ActionDispatcher::new(
            config,
            Arc::new(MemoryLedger::new()),
            ExecutorSet::uniform(mock),
            Arc::new(Notifier::disabled()),
        )
    }

    #[tokio::test]
    async fn test_dispatch_succeeds() {
        let mock = Arc::new(MockExecutor::new());
        let dispatcher = dispatcher_with(mock.clone(), config());

        let record = dispatcher.dispatch(restart_request("user-auth")).await.unwrap();

        assert_eq!(record.status, ActionStatus::Succeeded);
        assert_eq!(record.attempt_count, 1);
        assert!(record.completed_at.is_some());
        assert_eq!(mock.call_count("user-auth"), 1);
    }

    #[tokio::test]
    async fn test_single_flight_concurrent_dispatch() {
        let mock = Arc::new(MockExecutor::new());
        let dispatcher = Arc::new(dispatcher_with(mock, config()));

        let a = dispatcher.dispatch(restart_request("user-auth"));
        let b = dispatcher.dispatch(restart_request("user-auth"));
        let (a, b) = tokio::join!(a, b);

        let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
        assert_eq!(winner.unwrap().status, ActionStatus::Succeeded);
        assert!(matches!(
            loser.unwrap_err(),
            EngineError::Conflict { .. }
        ));
    }

    #[tokio::test]
    async fn test_retries_then_success() {
        let mock = Arc::new(MockExecutor::new().with_transient_failures("user-auth", 2));
        let dispatcher = dispatcher_with(mock.clone(), config());

        let record = dispatcher.dispatch(restart_request("user-auth")).await.unwrap();

        assert_eq!(record.status, ActionStatus::Succeeded);
        assert_eq!(record.attempt_count, 3);
        assert_eq!(mock.call_count("user-auth"), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_records_failure() {
        let mock = Arc::new(MockExecutor::new().with_failure("user-auth", "backend down"));
        let dispatcher = dispatcher_with(mock.clone(), config());

        let record = dispatcher.dispatch(restart_request("user-auth")).await.unwrap();

        assert_eq!(record.status, ActionStatus::Failed);
        assert_eq!(record.attempt_count, 3);
        assert!(record.result_message.unwrap().contains("backend down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_then_failed() {
        let mock = Arc::new(
            MockExecutor::new().with_delay("user-auth", Duration::from_secs(30)),
        );
        let dispatcher = dispatcher_with(mock.clone(), config());

        let record = dispatcher.dispatch(restart_request("user-auth")).await.unwrap();

        assert_eq!(record.status, ActionStatus::Failed);
        assert_eq!(record.attempt_count, 3);
        assert!(record.result_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_validation_rejects_before_ledger_write() {
        let ledger = Arc::new(MemoryLedger::new());
        let dispatcher = ActionDispatcher::new(
            config(),
            ledger.clone(),
            ExecutorSet::uniform(Arc::new(MockExecutor::new())),
            Arc::new(Notifier::disabled()),
        );

        // Scale without parameters
        let mut request = restart_request("user-auth");
        request.action_type = ActionType::Scale;
        let err = dispatcher.dispatch(request).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // Wrong scale shape for the platform
        let request = ActionRequest {
            service_name: "report-builder".to_string(),
            action_type: ActionType::Scale,
            target: target("report-builder", Platform::CloudRun),
            reason: None,
            triggered_by: TriggeredBy::Manual,
            scale: Some(ScaleSpec::Fixed { replicas: 5 }),
        };
        let err = dispatcher.dispatch(request).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // Rollout restart on serverless
        let request = ActionRequest {
            service_name: "report-builder".to_string(),
            action_type: ActionType::RolloutRestart,
            target: target("report-builder", Platform::CloudRun),
            reason: None,
            triggered_by: TriggeredBy::Manual,
            scale: None,
        };
        let err = dispatcher.dispatch(request).await.unwrap_err();
        assert!(matches!(err, EngineError::Unsupported { .. }));

        // None of the rejected requests touched the ledger
        assert!(ledger.history(&HistoryFilter::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_replica_ceiling() {
        let dispatcher = dispatcher_with(Arc::new(MockExecutor::new()), config());

        let request = ActionRequest {
            service_name: "user-auth".to_string(),
            action_type: ActionType::Scale,
            target: target("user-auth", Platform::Kubernetes),
            reason: None,
            triggered_by: TriggeredBy::Manual,
            scale: Some(ScaleSpec::Fixed { replicas: 5000 }),
        };
        let err = dispatcher.dispatch(request).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_dry_run_skips_executor() {
        let mock = Arc::new(MockExecutor::new());
        let dispatcher = dispatcher_with(
            mock.clone(),
            Arc::new(EngineConfig {
                dry_run: true,
                ..EngineConfig::default()
            }),
        );

        let record = dispatcher.dispatch(restart_request("user-auth")).await.unwrap();

        assert_eq!(record.status, ActionStatus::Succeeded);
        assert!(record.result_message.unwrap().starts_with("Dry-run"));
        assert_eq!(mock.call_count("user-auth"), 0);
    }

    #[tokio::test]
    async fn test_lock_released_after_completion() {
        let dispatcher = dispatcher_with(Arc::new(MockExecutor::new()), config());

        let first = dispatcher.dispatch(restart_request("user-auth")).await.unwrap();
        assert_eq!(first.status, ActionStatus::Succeeded);

        // A second dispatch for the same key succeeds once the first is done
        let second = dispatcher.dispatch(restart_request("user-auth")).await.unwrap();
        assert_eq!(second.status, ActionStatus::Succeeded);
        assert_ne!(first.action_id, second.action_id);
    }
}
