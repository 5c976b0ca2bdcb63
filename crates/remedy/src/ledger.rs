//! Action ledger.
//!
//! Append-only record of every action request and its lifecycle state. The
//! ledger also carries the single-flight invariant: a non-terminal record
//! for a `(service, action type)` key IS the lock for that key, created
//! atomically with the record insertion and released when the record reaches
//! a terminal state or the staleness sweep force-fails it.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::types::{ActionKey, ActionRecord, ActionRequest, ActionStatus};

/// Filter for ledger history queries. Records are returned ordered by
/// `created_at` descending; `before` plus `limit` make the sequence
/// restartable for pagination.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Only records for this service
    pub service: Option<String>,
    /// Only records in this status
    pub status: Option<ActionStatus>,
    /// Only records created at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Only records created at or before this instant
    pub until: Option<DateTime<Utc>>,
    /// Pagination cursor: only records created strictly before this instant
    pub before: Option<DateTime<Utc>>,
    /// Maximum number of records to return (0 = unlimited)
    pub limit: usize,
}

impl HistoryFilter {
    fn matches(&self, record: &ActionRecord) -> bool {
        if let Some(service) = &self.service {
            if &record.request.service_name != service {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.created_at > until {
                return false;
            }
        }
        if let Some(before) = self.before {
            if record.created_at >= before {
                return false;
            }
        }
        true
    }
}

/// Durable record of action requests and their lifecycle states.
///
/// Implementations must make `begin` atomic with respect to the in-flight
/// key check: two concurrent `begin` calls for the same key must never both
/// succeed.
#[async_trait]
pub trait ActionLedger: Send + Sync {
    /// Atomically acquire the single-flight lock for the request's key and
    /// insert a `pending` record.
    async fn begin(&self, request: ActionRequest) -> Result<ActionRecord, LedgerError>;

    /// Transition a record to a new status, enforcing monotonicity. A
    /// terminal transition sets `completed_at` and releases the lock.
    async fn transition(
        &self,
        action_id: Uuid,
        status: ActionStatus,
        message: Option<String>,
    ) -> Result<ActionRecord, LedgerError>;

    /// Increment a record's attempt counter.
    async fn bump_attempt(&self, action_id: Uuid) -> Result<u32, LedgerError>;

    /// Fetch a single record by id.
    async fn get(&self, action_id: Uuid) -> Option<ActionRecord>;

    /// Query records, newest first.
    async fn history(&self, filter: &HistoryFilter) -> Vec<ActionRecord>;

    /// Force-fail non-terminal records older than the grace period.
    /// Returns the records that were failed.
    async fn reconcile_stale(&self, grace: Duration) -> Vec<ActionRecord>;
}

/// In-memory ledger. One mutex over all interior state makes the
/// check-and-insert in `begin` atomic.
pub struct MemoryLedger {
    inner: Mutex<LedgerInner>,
}

#[derive(Default)]
struct LedgerInner {
    records: HashMap<Uuid, ActionRecord>,
    /// Insertion order (created_at ascending)
    order: Vec<Uuid>,
    /// Keys with a non-terminal record
    inflight: HashMap<ActionKey, Uuid>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionLedger for MemoryLedger {
    async fn begin(&self, request: ActionRequest) -> Result<ActionRecord, LedgerError> {
        let mut inner = self.inner.lock().await;

        let key = request.key();
        if inner.inflight.contains_key(&key) {
            return Err(LedgerError::KeyHeld {
                service: key.0,
                action_type: key.1,
            });
        }

        let record = ActionRecord::new(request);
        debug!(
            action_id = %record.action_id,
            service = %record.request.service_name,
            action_type = %record.request.action_type,
            "Action record created"
        );

        inner.inflight.insert(key, record.action_id);
        inner.order.push(record.action_id);
        inner.records.insert(record.action_id, record.clone());

        Ok(record)
    }

    async fn transition(
        &self,
        action_id: Uuid,
        status: ActionStatus,
        message: Option<String>,
    ) -> Result<ActionRecord, LedgerError> {
        let mut inner = self.inner.lock().await;

        let record = inner
            .records
            .get_mut(&action_id)
            .ok_or(LedgerError::NotFound(action_id))?;

        if !record.status.can_transition_to(status) {
            return Err(LedgerError::IllegalTransition {
                action_id,
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        if let Some(message) = message {
            record.result_message = Some(message);
        }
        if status.is_terminal() {
            record.completed_at = Some(Utc::now());
        }

        let record = record.clone();
        if status.is_terminal() {
            inner.inflight.remove(&record.key());
        }

        Ok(record)
    }

    async fn bump_attempt(&self, action_id: Uuid) -> Result<u32, LedgerError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .get_mut(&action_id)
            .ok_or(LedgerError::NotFound(action_id))?;
        record.attempt_count += 1;
        Ok(record.attempt_count)
    }

    async fn get(&self, action_id: Uuid) -> Option<ActionRecord> {
        self.inner.lock().await.records.get(&action_id).cloned()
    }

    async fn history(&self, filter: &HistoryFilter) -> Vec<ActionRecord> {
        let inner = self.inner.lock().await;

        let mut results = Vec::new();
        for id in inner.order.iter().rev() {
            if let Some(record) = inner.records.get(id) {
                if filter.matches(record) {
                    results.push(record.clone());
                    if filter.limit > 0 && results.len() >= filter.limit {
                        break;
                    }
                }
            }
        }
        results
    }

    async fn reconcile_stale(&self, grace: Duration) -> Vec<ActionRecord> {
        let mut inner = self.inner.lock().await;
        let cutoff = Utc::now()
            - ChronoDuration::from_std(grace).unwrap_or_else(|_| ChronoDuration::seconds(300));

        let stale: Vec<Uuid> = inner
            .inflight
            .values()
            .copied()
            .filter(|id| {
                inner
                    .records
                    .get(id)
                    .is_some_and(|r| r.created_at < cutoff)
            })
            .collect();

        let mut failed = Vec::new();
        for id in stale {
            if let Some(record) = inner.records.get_mut(&id) {
                warn!(
                    action_id = %id,
                    service = %record.request.service_name,
                    status = %record.status,
                    "Force-failing stale action record"
                );
                record.status = ActionStatus::Failed;
                record.completed_at = Some(Utc::now());
                record.result_message =
                    Some("Force-failed: exceeded stale-action grace period".to_string());
                let record = record.clone();
                inner.inflight.remove(&record.key());
                failed.push(record);
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionType, Platform, ServiceTarget, TriggeredBy};

    fn request(service: &str, action_type: ActionType) -> ActionRequest {
        ActionRequest {
            service_name: service.to_string(),
            action_type,
            target: ServiceTarget {
                service_name: service.to_string(),
                platform: Platform::Kubernetes,
                cluster_or_region: "prod-cluster".to_string(),
                namespace: None,
            },
            reason: None,
            triggered_by: TriggeredBy::Manual,
            scale: None,
        }
    }

    #[tokio::test]
    async fn test_begin_acquires_key() {
        let ledger = MemoryLedger::new();

        let record = ledger
            .begin(request("user-auth", ActionType::Restart))
            .await
            .unwrap();
        assert_eq!(record.status, ActionStatus::Pending);

        // Same key is held
        let err = ledger
            .begin(request("user-auth", ActionType::Restart))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::KeyHeld { .. }));

        // Different action type on the same service is a different key
        assert!(ledger
            .begin(request("user-auth", ActionType::Scale))
            .await
            .is_ok());

        // Different service is a different key
        assert!(ledger
            .begin(request("payment-api", ActionType::Restart))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_terminal_transition_releases_key() {
        let ledger = MemoryLedger::new();
        let record = ledger
            .begin(request("user-auth", ActionType::Restart))
            .await
            .unwrap();

        ledger
            .transition(record.action_id, ActionStatus::Running, None)
            .await
            .unwrap();
        let done = ledger
            .transition(
                record.action_id,
                ActionStatus::Succeeded,
                Some("restarted".to_string()),
            )
            .await
            .unwrap();
        assert!(done.completed_at.is_some());
        assert_eq!(done.result_message.as_deref(), Some("restarted"));

        // Key is free again
        assert!(ledger
            .begin(request("user-auth", ActionType::Restart))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_monotonic_status() {
        let ledger = MemoryLedger::new();
        let record = ledger
            .begin(request("user-auth", ActionType::Restart))
            .await
            .unwrap();

        ledger
            .transition(record.action_id, ActionStatus::Running, None)
            .await
            .unwrap();
        ledger
            .transition(record.action_id, ActionStatus::Failed, None)
            .await
            .unwrap();

        // No transition out of a terminal state
        for next in [
            ActionStatus::Pending,
            ActionStatus::Running,
            ActionStatus::Succeeded,
            ActionStatus::Failed,
        ] {
            let err = ledger
                .transition(record.action_id, next, None)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::IllegalTransition { .. }));
        }
    }

    #[tokio::test]
    async fn test_concurrent_begin_single_winner() {
        let ledger = std::sync::Arc::new(MemoryLedger::new());

        let a = ledger.begin(request("user-auth", ActionType::Restart));
        let b = ledger.begin(request("user-auth", ActionType::Restart));
        let (a, b) = tokio::join!(a, b);

        assert!(a.is_ok() != b.is_ok(), "exactly one begin must win");
    }

    #[tokio::test]
    async fn test_history_ordering_and_filters() {
        let ledger = MemoryLedger::new();

        let first = ledger
            .begin(request("user-auth", ActionType::Restart))
            .await
            .unwrap();
        ledger
            .transition(first.action_id, ActionStatus::Running, None)
            .await
            .unwrap();
        ledger
            .transition(first.action_id, ActionStatus::Succeeded, None)
            .await
            .unwrap();

        let second = ledger
            .begin(request("payment-api", ActionType::Scale))
            .await
            .unwrap();

        // Newest first
        let all = ledger.history(&HistoryFilter::default()).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].action_id, second.action_id);
        assert_eq!(all[1].action_id, first.action_id);

        // Service filter
        let by_service = ledger
            .history(&HistoryFilter {
                service: Some("user-auth".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(by_service.len(), 1);
        assert_eq!(by_service[0].action_id, first.action_id);

        // Status filter
        let pending = ledger
            .history(&HistoryFilter {
                status: Some(ActionStatus::Pending),
                ..Default::default()
            })
            .await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action_id, second.action_id);

        // Limit
        let limited = ledger
            .history(&HistoryFilter {
                limit: 1,
                ..Default::default()
            })
            .await;
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_history_cursor_pagination() {
        let ledger = MemoryLedger::new();
        for i in 0..5 {
            let record = ledger
                .begin(request(&format!("svc-{i}"), ActionType::Restart))
                .await
                .unwrap();
            ledger
                .transition(record.action_id, ActionStatus::Running, None)
                .await
                .unwrap();
            ledger
                .transition(record.action_id, ActionStatus::Succeeded, None)
                .await
                .unwrap();
        }

        let page1 = ledger
            .history(&HistoryFilter {
                limit: 2,
                ..Default::default()
            })
            .await;
        assert_eq!(page1.len(), 2);

        // Restart the sequence from the cursor
        let page2 = ledger
            .history(&HistoryFilter {
                limit: 2,
                before: Some(page1[1].created_at),
                ..Default::default()
            })
            .await;
        assert_eq!(page2.len(), 2);
        assert!(page2[0].created_at < page1[1].created_at);
    }

    #[tokio::test]
    async fn test_reconcile_stale() {
        let ledger = MemoryLedger::new();
        let record = ledger
            .begin(request("user-auth", ActionType::Restart))
            .await
            .unwrap();
        ledger
            .transition(record.action_id, ActionStatus::Running, None)
            .await
            .unwrap();

        // Fresh record survives the sweep
        let failed = ledger.reconcile_stale(Duration::from_secs(300)).await;
        assert!(failed.is_empty());

        // With a zero grace period the running record is force-failed
        let failed = ledger.reconcile_stale(Duration::from_secs(0)).await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, ActionStatus::Failed);

        // Lock is released by the sweep
        assert!(ledger
            .begin(request("user-auth", ActionType::Restart))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_bump_attempt() {
        let ledger = MemoryLedger::new();
        let record = ledger
            .begin(request("user-auth", ActionType::Restart))
            .await
            .unwrap();

        assert_eq!(ledger.bump_attempt(record.action_id).await.unwrap(), 1);
        assert_eq!(ledger.bump_attempt(record.action_id).await.unwrap(), 2);
        assert_eq!(
            ledger.get(record.action_id).await.unwrap().attempt_count,
            2
        );
    }
}
