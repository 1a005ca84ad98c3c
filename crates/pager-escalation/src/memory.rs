//! In-memory collaborators.
//!
//! Used by the simulator binary and the test suites. Every type uses interior
//! mutability so it can be shared behind an `Arc` with the engine while the
//! caller keeps editing it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;

use crate::collaborators::{
    ActionInvoker, AlertGroupSource, ChainReader, Collaborators, GroupResolver,
    NotificationContext, NotificationDispatcher, ScheduleResolver,
};
use crate::error::{EscalationError, Result};
use crate::queue::ManualQueue;
use crate::snapshot::ChannelFilterSnapshot;
use crate::store::InMemoryStore;
use crate::types::{
    ActionId, AlertGroup, AlertGroupId, AlertGroupStatus, ChainId, ChannelFilterId, GroupId,
    PolicyConfig, RouteConfig, ScheduleId, UserId,
};

/// Routes, chains, schedules, groups and alert groups held in memory.
///
/// Schedules are static: the same users are on call at any time.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    routes: RwLock<HashMap<ChannelFilterId, RouteConfig>>,
    policies: RwLock<HashMap<ChainId, Vec<PolicyConfig>>>,
    schedules: RwLock<HashMap<ScheduleId, Vec<UserId>>>,
    groups: RwLock<HashMap<GroupId, Vec<UserId>>>,
    alert_groups: RwLock<HashMap<AlertGroupId, AlertGroup>>,
    alerts: RwLock<HashMap<AlertGroupId, Vec<DateTime<Utc>>>>,
}

impl StaticDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a route.
    pub fn put_route(&self, route: RouteConfig) {
        self.routes.write().insert(route.id.clone(), route);
    }

    /// Deletes a route.
    pub fn remove_route(&self, id: &ChannelFilterId) -> bool {
        self.routes.write().remove(id).is_some()
    }

    /// Replaces the policies of a chain.
    pub fn put_policies(&self, chain_id: ChainId, policies: Vec<PolicyConfig>) {
        self.policies.write().insert(chain_id, policies);
    }

    /// Sets who is on call in a schedule.
    pub fn put_schedule(&self, id: ScheduleId, on_call: Vec<UserId>) {
        self.schedules.write().insert(id, on_call);
    }

    /// Sets the members of a group.
    pub fn put_group(&self, id: GroupId, members: Vec<UserId>) {
        self.groups.write().insert(id, members);
    }

    /// Adds or replaces an alert group.
    pub fn put_alert_group(&self, alert_group: AlertGroup) {
        self.alert_groups
            .write()
            .insert(alert_group.id.clone(), alert_group);
    }

    /// Deletes an alert group.
    pub fn remove_alert_group(&self, id: &AlertGroupId) -> bool {
        self.alert_groups.write().remove(id).is_some()
    }

    /// Changes the status of an alert group.
    pub fn set_status(&self, id: &AlertGroupId, status: AlertGroupStatus) -> bool {
        match self.alert_groups.write().get_mut(id) {
            Some(alert_group) => {
                alert_group.status = status;
                true
            }
            None => false,
        }
    }

    /// Records a new alert for an alert group.
    pub fn push_alert(&self, id: &AlertGroupId, at: DateTime<Utc>) {
        self.alerts.write().entry(id.clone()).or_default().push(at);
    }
}

impl ChainReader for StaticDirectory {
    fn route(&self, alert_group: &AlertGroup) -> Option<RouteConfig> {
        let id = alert_group.channel_filter_id.as_ref()?;
        self.routes.read().get(id).cloned()
    }

    fn policies(&self, chain_id: &ChainId) -> Vec<PolicyConfig> {
        let mut policies = self
            .policies
            .read()
            .get(chain_id)
            .cloned()
            .unwrap_or_default();
        policies.sort_by_key(|p| p.order);
        policies
    }
}

impl ScheduleResolver for StaticDirectory {
    fn on_call_now(&self, schedule_id: &ScheduleId, _at: DateTime<Utc>) -> Result<Vec<UserId>> {
        self.schedules
            .read()
            .get(schedule_id)
            .cloned()
            .ok_or_else(|| EscalationError::missing("schedule", schedule_id))
    }
}

impl GroupResolver for StaticDirectory {
    fn members(&self, group_id: &GroupId) -> Result<Vec<UserId>> {
        self.groups
            .read()
            .get(group_id)
            .cloned()
            .ok_or_else(|| EscalationError::missing("group", group_id))
    }
}

impl AlertGroupSource for StaticDirectory {
    fn alert_group(&self, alert_group_id: &AlertGroupId) -> Option<AlertGroup> {
        self.alert_groups.read().get(alert_group_id).cloned()
    }

    fn count_alerts_since(&self, alert_group_id: &AlertGroupId, since: DateTime<Utc>) -> usize {
        self.alerts
            .read()
            .get(alert_group_id)
            .map_or(0, |alerts| alerts.iter().filter(|at| **at >= since).count())
    }
}

/// A notification that was handed to the dispatcher.
pub type SentNotification = (UserId, AlertGroupId, NotificationContext);

/// Dispatcher that records notifications instead of delivering them.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: RwLock<Vec<SentNotification>>,
    channel_posts: RwLock<Vec<(AlertGroupId, ChannelFilterId)>>,
    failing: RwLock<HashSet<UserId>>,
    deleted: RwLock<HashSet<UserId>>,
}

impl RecordingDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every notification to `user` fail.
    pub fn fail_for(&self, user: impl Into<UserId>) {
        self.failing.write().insert(user.into());
    }

    /// Treats `user` as deleted.
    pub fn forget_user(&self, user: impl Into<UserId>) {
        self.deleted.write().insert(user.into());
    }

    /// Returns every successful notification in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.read().clone()
    }

    /// Returns the users notified, in order.
    #[must_use]
    pub fn notified_users(&self) -> Vec<UserId> {
        self.sent.read().iter().map(|(user, _, _)| user.clone()).collect()
    }

    /// Returns the channel posts in order.
    #[must_use]
    pub fn channel_posts(&self) -> Vec<(AlertGroupId, ChannelFilterId)> {
        self.channel_posts.read().clone()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn notify(
        &self,
        user_id: &UserId,
        alert_group_id: &AlertGroupId,
        context: &NotificationContext,
    ) -> Result<()> {
        if self.deleted.read().contains(user_id) {
            return Err(EscalationError::missing("user", user_id));
        }
        if self.failing.read().contains(user_id) {
            return Err(EscalationError::DispatchFailed {
                reason: format!("delivery to {user_id} rejected"),
            });
        }
        info!(
            user_id = %user_id,
            alert_group_id = %alert_group_id,
            step = %context.step,
            important = context.important,
            "notify"
        );
        self.sent
            .write()
            .push((user_id.clone(), alert_group_id.clone(), context.clone()));
        Ok(())
    }

    fn notify_channel(
        &self,
        alert_group_id: &AlertGroupId,
        channel_filter: &ChannelFilterSnapshot,
    ) -> Result<()> {
        info!(
            alert_group_id = %alert_group_id,
            route = %channel_filter.label,
            "notify channel"
        );
        self.channel_posts
            .write()
            .push((alert_group_id.clone(), channel_filter.id.clone()));
        Ok(())
    }
}

/// Action invoker that records triggers and resolutions.
///
/// When attached to a [`StaticDirectory`] a resolution also marks the alert
/// group resolved there.
#[derive(Debug, Default)]
pub struct RecordingActions {
    triggered: RwLock<Vec<(ActionId, AlertGroupId)>>,
    resolved: RwLock<Vec<AlertGroupId>>,
    failing: RwLock<HashSet<ActionId>>,
    directory: Option<Arc<StaticDirectory>>,
}

impl RecordingActions {
    /// Creates an invoker that only records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an invoker that also resolves alert groups in `directory`.
    #[must_use]
    pub fn with_directory(directory: Arc<StaticDirectory>) -> Self {
        Self {
            directory: Some(directory),
            ..Self::default()
        }
    }

    /// Makes every trigger of `action` fail.
    pub fn fail_for(&self, action: impl Into<ActionId>) {
        self.failing.write().insert(action.into());
    }

    /// Returns every trigger in order.
    #[must_use]
    pub fn triggered(&self) -> Vec<(ActionId, AlertGroupId)> {
        self.triggered.read().clone()
    }

    /// Returns every resolved alert group in order.
    #[must_use]
    pub fn resolved(&self) -> Vec<AlertGroupId> {
        self.resolved.read().clone()
    }
}

impl ActionInvoker for RecordingActions {
    fn trigger(&self, action_id: &ActionId, alert_group_id: &AlertGroupId) -> Result<()> {
        if self.failing.read().contains(action_id) {
            return Err(EscalationError::DispatchFailed {
                reason: format!("action {action_id} failed"),
            });
        }
        self.triggered
            .write()
            .push((action_id.clone(), alert_group_id.clone()));
        Ok(())
    }

    fn resolve_alert_group(&self, alert_group_id: &AlertGroupId) -> Result<()> {
        if let Some(directory) = &self.directory {
            directory.set_status(alert_group_id, AlertGroupStatus::Resolved);
        }
        self.resolved.write().push(alert_group_id.clone());
        Ok(())
    }
}

/// A full set of in-memory collaborators with handles to each part.
#[derive(Debug, Clone)]
pub struct InMemoryKit {
    /// The bundle to hand to the engine.
    pub collaborators: Collaborators,
    /// Routes, chains, schedules, groups, alert groups.
    pub directory: Arc<StaticDirectory>,
    /// Recorded notifications.
    pub dispatcher: Arc<RecordingDispatcher>,
    /// Recorded actions.
    pub actions: Arc<RecordingActions>,
    /// Scheduled wake-ups.
    pub queue: Arc<ManualQueue>,
    /// Escalation documents.
    pub store: Arc<InMemoryStore>,
}

impl InMemoryKit {
    /// Creates an empty kit.
    #[must_use]
    pub fn new() -> Self {
        let directory = Arc::new(StaticDirectory::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let actions = Arc::new(RecordingActions::with_directory(Arc::clone(&directory)));
        let queue = Arc::new(ManualQueue::new());
        let store = Arc::new(InMemoryStore::new());
        let collaborators = Collaborators {
            chains: directory.clone(),
            dispatcher: dispatcher.clone(),
            schedules: directory.clone(),
            groups: directory.clone(),
            actions: actions.clone(),
            alert_groups: directory.clone(),
            queue: queue.clone(),
            store: store.clone(),
        };
        Self {
            collaborators,
            directory,
            dispatcher,
            actions,
            queue,
            store,
        }
    }
}

impl Default for InMemoryKit {
    fn default() -> Self {
        Self::new()
    }
}
