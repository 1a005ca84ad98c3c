//! Escalation execution engine for on-call paging.
//!
//! When an alert group starts firing, its route's escalation chain is frozen
//! into an [`EscalationSnapshot`]. The [`Engine`] then walks that snapshot
//! step by step (notify users, wait, gate on time or alert volume, trigger
//! actions) across many short invocations driven by delayed wake-ups, until
//! the chain runs out or the alert group is resolved, acknowledged or
//! silenced.
//!
//! # Architecture
//!
//! - [`types`] and [`step`]: live configuration rows and the typed step union
//! - [`snapshot`]: the frozen chain plus its runtime cursor
//! - [`builder`]: copies live configuration into a snapshot
//! - [`executor`]: runs steps against the [`collaborators`]
//! - [`engine`]: lifecycle, persistence and wake-up idempotency
//! - [`store`], [`queue`], [`memory`]: in-process collaborator implementations
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Utc;
//! use pager_escalation::{
//!     AlertGroup, BackendRegistry, ChainConfig, ChannelFilterId, Engine, EngineConfig,
//!     InMemoryKit, PolicyConfig, RouteConfig, StepKind,
//! };
//!
//! let kit = InMemoryKit::new();
//! kit.directory.put_route(RouteConfig {
//!     id: ChannelFilterId::new("R1"),
//!     label: "default".to_string(),
//!     is_default: true,
//!     backends: Default::default(),
//!     chain: Some(ChainConfig { id: "CH1".into(), name: "Primary".to_string() }),
//! });
//! kit.directory.put_policies(
//!     "CH1".into(),
//!     vec![PolicyConfig::new("P1", 0, StepKind::NotifyMultipleUsers).with_users(["alice"])],
//! );
//! kit.directory.put_alert_group(AlertGroup::firing("AG1", Some(ChannelFilterId::new("R1"))));
//!
//! let engine = Engine::new(
//!     EngineConfig::default(),
//!     kit.collaborators.clone(),
//!     Arc::new(BackendRegistry::with_defaults()),
//! )
//! .unwrap();
//! engine.trigger(&"AG1".into(), Utc::now()).unwrap();
//! assert_eq!(kit.dispatcher.notified_users().len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builder;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod memory;
pub mod queue;
pub mod registry;
pub mod snapshot;
pub mod step;
pub mod store;
pub mod types;

pub use builder::SnapshotBuilder;
pub use collaborators::{
    ActionInvoker, AlertGroupSource, ChainReader, Collaborators, DelayedTaskQueue, GroupResolver,
    NotificationContext, NotificationDispatcher, ScheduleResolver, SnapshotStore, StoredBlob,
    Wakeup,
};
pub use config::{EmptyScheduleBehavior, EngineConfig, MAX_INTERVAL_SECS};
pub use engine::{
    AuditReport, Engine, EscalationDocument, EscalationState, Invocation, StaleReason, StopReason,
};
pub use error::{EscalationError, Result};
pub use executor::{EscalationLogRecord, ExecutionReport, LogEvent, RunOutcome, StepExecutor};
pub use memory::{InMemoryKit, RecordingActions, RecordingDispatcher, StaticDirectory};
pub use queue::{ManualQueue, ScheduledWakeup, TokioDelayedQueue, WakeupReceiver, run_wakeup_worker};
pub use registry::{BackendDescriptor, BackendRegistry};
pub use snapshot::{
    ChannelFilterSnapshot, EscalationChainSnapshot, EscalationPolicySnapshot, EscalationSnapshot,
    NEXT_STEP_ETA_TOLERANCE_SECS,
};
pub use step::{Step, StepKind, TimeWindow};
pub use store::{InMemoryStore, JsonFileStore};
pub use types::{
    ActionId, AlertGroup, AlertGroupId, AlertGroupStatus, BackendSettings, ChainConfig, ChainId,
    ChannelFilterId, GroupId, PolicyConfig, PolicyId, RouteConfig, ScheduleId, UserId,
};
