//! Capabilities the engine consumes from the rest of the platform.
//!
//! Implement these traits to plug the engine into real storage, chat and
//! paging backends. In-memory implementations live in [`crate::memory`],
//! [`crate::store`] and [`crate::queue`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::snapshot::ChannelFilterSnapshot;
use crate::step::StepKind;
use crate::types::{
    ActionId, AlertGroup, AlertGroupId, ChainId, GroupId, PolicyConfig, PolicyId, RouteConfig,
    ScheduleId, UserId,
};

/// Reads live routes and chains. Used only while building a snapshot.
pub trait ChainReader: Send + Sync + fmt::Debug {
    /// Returns the route of an alert group, `None` if it was deleted.
    fn route(&self, alert_group: &AlertGroup) -> Option<RouteConfig>;

    /// Returns the policies of a chain ordered by `order`.
    fn policies(&self, chain_id: &ChainId) -> Vec<PolicyConfig>;
}

/// Extra information handed to the dispatcher with each notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContext {
    /// Policy that caused the notification.
    pub policy_id: PolicyId,
    /// Step type of that policy.
    pub step: StepKind,
    /// Use the user's important notification policy.
    pub important: bool,
}

/// Delivers notifications. Fire-and-forget; each call is isolated.
pub trait NotificationDispatcher: Send + Sync + fmt::Debug {
    /// Notifies one user about an alert group.
    fn notify(
        &self,
        user_id: &UserId,
        alert_group_id: &AlertGroupId,
        context: &NotificationContext,
    ) -> Result<()>;

    /// Posts an alert group to every enabled backend channel of its route.
    fn notify_channel(
        &self,
        alert_group_id: &AlertGroupId,
        channel_filter: &ChannelFilterSnapshot,
    ) -> Result<()>;
}

/// Resolves who is on call.
pub trait ScheduleResolver: Send + Sync + fmt::Debug {
    /// Returns the users on call in `schedule_id` at `at`.
    fn on_call_now(&self, schedule_id: &ScheduleId, at: DateTime<Utc>) -> Result<Vec<UserId>>;
}

/// Resolves user group membership.
pub trait GroupResolver: Send + Sync + fmt::Debug {
    /// Returns the members of `group_id`.
    fn members(&self, group_id: &GroupId) -> Result<Vec<UserId>>;
}

/// Triggers outgoing actions on behalf of an escalation.
pub trait ActionInvoker: Send + Sync + fmt::Debug {
    /// Triggers a webhook or custom button. Must not block on the remote end.
    fn trigger(&self, action_id: &ActionId, alert_group_id: &AlertGroupId) -> Result<()>;

    /// Resolves the alert group as the final step of a chain.
    fn resolve_alert_group(&self, alert_group_id: &AlertGroupId) -> Result<()>;
}

/// Read access to alert groups and their alerts.
pub trait AlertGroupSource: Send + Sync + fmt::Debug {
    /// Returns the current view of an alert group, `None` if it is gone.
    fn alert_group(&self, alert_group_id: &AlertGroupId) -> Option<AlertGroup>;

    /// Counts alerts of the group created at or after `since`.
    fn count_alerts_since(&self, alert_group_id: &AlertGroupId, since: DateTime<Utc>) -> usize;
}

/// A scheduled re-invocation of the executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Wakeup {
    /// Alert group to wake.
    pub alert_group_id: AlertGroupId,
    /// Token that must match the one stored with the escalation.
    pub token: Uuid,
}

impl Wakeup {
    /// Creates a wake-up with a freshly minted token.
    #[must_use]
    pub fn mint(alert_group_id: AlertGroupId) -> Self {
        Self {
            alert_group_id,
            token: Uuid::new_v4(),
        }
    }
}

/// A distributed delayed-task queue with at-least-once delivery.
pub trait DelayedTaskQueue: Send + Sync + fmt::Debug {
    /// Enqueues `wakeup` to run at `run_at`.
    fn schedule(&self, wakeup: &Wakeup, run_at: DateTime<Utc>) -> Result<()>;
}

/// A stored document with its revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Monotonic revision, bumped by every successful save.
    pub revision: u64,
    /// Serialized document.
    pub blob: String,
}

/// Single-document storage with optimistic concurrency.
pub trait SnapshotStore: Send + Sync + fmt::Debug {
    /// Loads the document of an alert group.
    fn load(&self, alert_group_id: &AlertGroupId) -> Result<Option<StoredBlob>>;

    /// Atomically replaces the document if its revision still equals
    /// `expected_revision` (`None` meaning "must not exist yet").
    ///
    /// Returns the new revision.
    ///
    /// # Errors
    ///
    /// Returns `EscalationError::WriteConflict` if the stored revision differs.
    fn save(
        &self,
        alert_group_id: &AlertGroupId,
        blob: &str,
        expected_revision: Option<u64>,
    ) -> Result<u64>;
}

/// Every collaborator the engine talks to.
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// Live chain configuration.
    pub chains: Arc<dyn ChainReader>,
    /// Notification delivery.
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    /// On-call schedules.
    pub schedules: Arc<dyn ScheduleResolver>,
    /// User groups.
    pub groups: Arc<dyn GroupResolver>,
    /// Webhooks, buttons and resolution.
    pub actions: Arc<dyn ActionInvoker>,
    /// Alert group status and alert counts.
    pub alert_groups: Arc<dyn AlertGroupSource>,
    /// Delayed wake-ups.
    pub queue: Arc<dyn DelayedTaskQueue>,
    /// Escalation documents.
    pub store: Arc<dyn SnapshotStore>,
}
