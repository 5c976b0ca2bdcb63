//! Stale-action reconciliation.
//!
//! A dispatcher crash mid-action leaves a `running` record holding its
//! single-flight lock. The sweep force-fails non-terminal records older than
//! the grace period so the key becomes dispatchable again. Runs once at
//! startup and then periodically in the background.

use notify::{Notifier, NotifyEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::ledger::ActionLedger;

/// Interval between background sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Force-fail stale records once. Returns the number of records failed.
pub async fn sweep_once(
    ledger: &Arc<dyn ActionLedger>,
    notifier: &Notifier,
    grace: Duration,
) -> usize {
    let failed = ledger.reconcile_stale(grace).await;

    for record in &failed {
        warn!(
            action_id = %record.action_id,
            service = %record.request.service_name,
            action_type = %record.request.action_type,
            "Stale action force-failed; lock released"
        );
        notifier.notify(NotifyEvent::HealthAlert {
            service_name: record.request.service_name.clone(),
            status: "stale_action".to_string(),
            message: format!(
                "Action {} ({}) exceeded the {}s grace period and was force-failed",
                record.action_id,
                record.request.action_type,
                grace.as_secs()
            ),
            timestamp: chrono::Utc::now(),
        });
    }

    failed.len()
}

/// Run the periodic staleness sweep until the process exits.
pub async fn run_sweeper(ledger: Arc<dyn ActionLedger>, notifier: Arc<Notifier>, grace: Duration) {
    info!(
        grace_secs = grace.as_secs(),
        interval_secs = SWEEP_INTERVAL.as_secs(),
        "Stale-action sweeper started"
    );

    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    // The first tick fires immediately; the startup sweep already ran.
    interval.tick().await;

    loop {
        interval.tick().await;
        let swept = sweep_once(&ledger, &notifier, grace).await;
        if swept > 0 {
            info!(swept, "Staleness sweep force-failed records");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::types::{
        ActionRequest, ActionStatus, ActionType, Platform, ServiceTarget, TriggeredBy,
    };

    fn request(service: &str) -> ActionRequest {
        ActionRequest {
            service_name: service.to_string(),
            action_type: ActionType::Restart,
            target: ServiceTarget {
                service_name: service.to_string(),
                platform: Platform::Kubernetes,
                cluster_or_region: "prod".to_string(),
                namespace: None,
            },
            reason: None,
            triggered_by: TriggeredBy::Auto,
            scale: None,
        }
    }

    #[tokio::test]
    async fn test_sweep_releases_stuck_lock() {
        let ledger: Arc<dyn ActionLedger> = Arc::new(MemoryLedger::new());
        let notifier = Notifier::disabled();

        let record = ledger.begin(request("user-auth")).await.unwrap();
        ledger
            .transition(record.action_id, ActionStatus::Running, None)
            .await
            .unwrap();

        // Within the grace period nothing is swept
        assert_eq!(
            sweep_once(&ledger, &notifier, Duration::from_secs(300)).await,
            0
        );

        // Past the grace period the record is failed and the key released
        assert_eq!(
            sweep_once(&ledger, &notifier, Duration::from_secs(0)).await,
            1
        );
        let swept = ledger.get(record.action_id).await.unwrap();
        assert_eq!(swept.status, ActionStatus::Failed);
        assert!(ledger.begin(request("user-auth")).await.is_ok());
    }
}
