//! Anomaly-driven auto-remediation engine.
//!
//! Receives anomaly signals about running workloads, decides whether and how
//! to remediate, and safely executes remediation actions (restart, scale,
//! rolling restart) against Kubernetes or Cloud Run backends. Guarantees
//! at-most-one in-flight action per `(service, action type)` key, records a
//! complete audit trail, and notifies external channels.
//!
//! # Architecture
//!
//! ```text
//! AnomalyEvent -> PolicyEngine -> ActionDispatcher -> TargetExecutor
//!                                       |
//!                                 ActionLedger -> Notifier
//! ```
//!
//! Manual operator requests enter directly at the dispatcher, bypassing the
//! policy engine. The [`ledger::ActionLedger`] is the single shared mutable
//! resource: the single-flight lock for a key is the existence of a
//! non-terminal record for it, created atomically with the record insertion.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod policy;
pub mod reconcile;
pub mod registry;
pub mod server;
pub mod types;

pub use config::{EngineConfig, FileConfig};
pub use dispatcher::ActionDispatcher;
pub use error::{EngineError, ExecutorError, LedgerError};
pub use ledger::{ActionLedger, HistoryFilter, MemoryLedger};
pub use policy::{Decision, PolicyConfig, PolicyEngine, PolicyRule};
pub use registry::TargetRegistry;
pub use types::{
    ActionRecord, ActionRequest, ActionStatus, ActionType, AnomalyEvent, AnomalySeverity,
    Platform, ScaleSpec, ServiceTarget, TriggeredBy,
};
