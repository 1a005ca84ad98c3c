//! Escalation snapshots.
//!
//! An [`EscalationSnapshot`] is a frozen copy of a route and its escalation
//! chain, taken when an alert group first needs escalating. Its structure
//! (policies, their order and their step configuration) never changes after
//! it is built; only the runtime fields do:
//!
//! - the cursor (`last_active_escalation_policy_order`), a list index
//! - `next_step_eta` and `pause_escalation`
//! - per-policy round-robin and counter state

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EscalationError, Result};
use crate::step::Step;
use crate::types::{BackendSettings, ChainId, ChannelFilterId, PolicyConfig, PolicyId, UserId};

/// How far in the past `next_step_eta` may be before the wake-up counts as missed.
pub const NEXT_STEP_ETA_TOLERANCE_SECS: i64 = 5 * 60;

/// Frozen copy of the route an alert group was assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFilterSnapshot {
    /// Route id.
    pub id: ChannelFilterId,
    /// Display label.
    pub label: String,
    /// Whether this was the catch-all route.
    #[serde(default)]
    pub is_default: bool,
    /// Settings for registered notification backends.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendSettings>,
}

impl ChannelFilterSnapshot {
    /// Returns true if `backend` was enabled on the route at build time.
    #[must_use]
    pub fn backend_enabled(&self, backend: &str) -> bool {
        self.backends.get(backend).is_some_and(|b| b.enabled)
    }
}

/// Frozen copy of an escalation chain's display fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationChainSnapshot {
    /// Chain id.
    pub id: ChainId,
    /// Chain name.
    pub name: String,
}

/// One step of the frozen chain plus its runtime state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicySnapshot {
    /// Policy id.
    pub id: PolicyId,
    /// Chain position at build time.
    pub order: u32,
    /// Step type and configuration.
    pub step: Step,
    /// Round-robin cursor for `NOTIFY_USERS_QUEUE`.
    #[serde(default)]
    pub last_notified_user: Option<UserId>,
    /// Consecutive passes (alert-count gate) or repetitions (repeat step).
    #[serde(default)]
    pub escalation_counter: u32,
    /// Last time a gate evaluated without passing.
    #[serde(default)]
    pub passed_last_time: Option<DateTime<Utc>>,
    /// The step is holding escalation until it is re-evaluated.
    #[serde(default)]
    pub pause_escalation: bool,
}

impl EscalationPolicySnapshot {
    /// Creates a snapshot with neutral runtime state.
    #[must_use]
    pub const fn new(id: PolicyId, order: u32, step: Step) -> Self {
        Self {
            id,
            order,
            step,
            last_notified_user: None,
            escalation_counter: 0,
            passed_last_time: None,
            pause_escalation: false,
        }
    }

    /// Materializes the snapshot of a live policy row.
    #[must_use]
    pub fn from_policy(policy: &PolicyConfig) -> Self {
        Self::new(policy.id.clone(), policy.order, Step::from_policy(policy))
    }

    /// Returns the user a `NOTIFY_USERS_QUEUE` step would notify next.
    #[must_use]
    pub fn next_queue_user(&self) -> Option<&UserId> {
        match &self.step {
            Step::NotifyUsersQueue { users, .. } => {
                next_user_in_queue(users, self.last_notified_user.as_ref())
            }
            _ => None,
        }
    }
}

/// Picks the user after `last` in `users`, wrapping around.
///
/// Selection is by position: a `last` that is `None` or no longer in the
/// list restarts the queue at its first user.
#[must_use]
pub fn next_user_in_queue<'a>(users: &'a [UserId], last: Option<&UserId>) -> Option<&'a UserId> {
    let next = last
        .and_then(|last| users.iter().position(|u| u == last))
        .map_or(0, |index| (index + 1) % users.len());
    users.get(next)
}

/// The escalation state container of one alert group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSnapshot {
    /// Route at build time, `None` if it was already deleted.
    pub channel_filter_snapshot: Option<ChannelFilterSnapshot>,
    /// Chain at build time, `None` if the route had no chain.
    pub escalation_chain_snapshot: Option<EscalationChainSnapshot>,
    /// Policies ordered by `order`.
    #[serde(default)]
    pub escalation_policies_snapshots: Vec<EscalationPolicySnapshot>,
    /// List index of the last executed policy.
    #[serde(default)]
    pub last_active_escalation_policy_order: Option<usize>,
    /// When the next step is due.
    #[serde(default)]
    pub next_step_eta: Option<DateTime<Utc>>,
    /// Escalation is paused (maintenance).
    #[serde(default)]
    pub pause_escalation: bool,
}

impl EscalationSnapshot {
    /// Returns the frozen policy list.
    #[must_use]
    pub fn policies(&self) -> &[EscalationPolicySnapshot] {
        &self.escalation_policies_snapshots
    }

    /// Returns the list index of the next policy to execute.
    #[must_use]
    pub fn next_active_policy_index(&self) -> Option<usize> {
        let next = self
            .last_active_escalation_policy_order
            .map_or(0, |cursor| cursor + 1);
        (next < self.escalation_policies_snapshots.len()).then_some(next)
    }

    /// Returns the next policy to execute, `None` once the chain is exhausted.
    #[must_use]
    pub fn next_active_policy(&self) -> Option<&EscalationPolicySnapshot> {
        self.next_active_policy_index()
            .and_then(|index| self.escalation_policies_snapshots.get(index))
    }

    /// Returns the last executed policy.
    #[must_use]
    pub fn last_active_policy(&self) -> Option<&EscalationPolicySnapshot> {
        self.last_active_escalation_policy_order
            .and_then(|cursor| self.escalation_policies_snapshots.get(cursor))
    }

    /// Returns every policy up to and including the cursor.
    #[must_use]
    pub fn executed_policies(&self) -> &[EscalationPolicySnapshot] {
        match self.last_active_escalation_policy_order {
            Some(cursor) => {
                let end = (cursor + 1).min(self.escalation_policies_snapshots.len());
                &self.escalation_policies_snapshots[..end]
            }
            None => &[],
        }
    }

    /// Returns true if no policy is left to execute.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.next_active_policy_index().is_none()
    }

    /// Returns true if the next step is due at `now`.
    #[must_use]
    pub fn step_is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_step_eta.is_none_or(|eta| eta <= now)
    }

    /// Returns false if `next_step_eta` lies further in the past than the
    /// tolerance allows, meaning a wake-up was missed or dropped.
    #[must_use]
    pub fn next_step_eta_is_valid(&self, now: DateTime<Utc>) -> bool {
        self.next_step_eta
            .is_none_or(|eta| {
                eta.checked_add_signed(Duration::seconds(NEXT_STEP_ETA_TOLERANCE_SECS))
                    .is_none_or(|deadline| deadline > now)
            })
    }

    /// Serializes the snapshot to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `EscalationError::Serialization` if serialization fails.
    pub fn to_dict(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(EscalationError::from)
    }

    /// Restores a snapshot from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `EscalationError::Serialization` if the value does not decode or
    /// its cursor points outside the policy list.
    pub fn from_dict(value: serde_json::Value) -> Result<Self> {
        let snapshot: Self = serde_json::from_value(value)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Checks the structural invariants a decoded snapshot must satisfy.
    ///
    /// # Errors
    ///
    /// Returns `EscalationError::Serialization` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let len = self.escalation_policies_snapshots.len();
        if let Some(cursor) = self.last_active_escalation_policy_order {
            if cursor >= len {
                return Err(EscalationError::Serialization(format!(
                    "cursor {cursor} outside policy list of length {len}"
                )));
            }
        }
        let ordered = self
            .escalation_policies_snapshots
            .windows(2)
            .all(|pair| pair[0].order < pair[1].order);
        if !ordered {
            return Err(EscalationError::Serialization(
                "policy orders are not strictly increasing".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use test_case::test_case;

    fn users(ids: &[&str]) -> Vec<UserId> {
        ids.iter().map(|id| UserId::new(*id)).collect()
    }

    fn snapshot_with_orders(orders: &[u32]) -> EscalationSnapshot {
        EscalationSnapshot {
            escalation_policies_snapshots: orders
                .iter()
                .map(|order| {
                    EscalationPolicySnapshot::new(
                        PolicyId::new(format!("P{order}")),
                        *order,
                        Step::wait(None),
                    )
                })
                .collect(),
            ..EscalationSnapshot::default()
        }
    }

    #[test_case(Some("B"), "C" ; "advances to following user")]
    #[test_case(Some("C"), "A" ; "wraps to first user")]
    #[test_case(None, "A" ; "starts at first user")]
    #[test_case(Some("Z"), "A" ; "unknown user restarts queue")]
    fn round_robin_selection(last: Option<&str>, expected: &str) {
        let queue = users(&["A", "B", "C"]);
        let last = last.map(UserId::new);
        assert_eq!(
            next_user_in_queue(&queue, last.as_ref()),
            Some(&UserId::new(expected))
        );
    }

    #[test]
    fn round_robin_on_empty_queue() {
        assert_eq!(next_user_in_queue(&[], Some(&UserId::new("A"))), None);
    }

    #[test]
    fn cursor_queries_on_fresh_snapshot() {
        let snapshot = snapshot_with_orders(&[12, 42]);
        assert_eq!(snapshot.next_active_policy().map(|p| p.order), Some(12));
        assert!(snapshot.last_active_policy().is_none());
        assert!(snapshot.executed_policies().is_empty());
        assert!(!snapshot.is_exhausted());
    }

    #[test]
    fn non_sequential_orders_follow_list_position() {
        let mut snapshot = snapshot_with_orders(&[12, 42]);
        snapshot.last_active_escalation_policy_order = Some(0);
        assert_eq!(snapshot.next_active_policy().map(|p| p.order), Some(42));
        assert_eq!(snapshot.last_active_policy().map(|p| p.order), Some(12));
        assert_eq!(snapshot.executed_policies().len(), 1);

        snapshot.last_active_escalation_policy_order = Some(1);
        assert!(snapshot.next_active_policy().is_none());
        assert!(snapshot.is_exhausted());
        assert_eq!(snapshot.executed_policies().len(), 2);
    }

    #[test]
    fn empty_chain_is_exhausted() {
        let snapshot = EscalationSnapshot::default();
        assert!(snapshot.is_exhausted());
        assert!(snapshot.next_active_policy().is_none());
    }

    #[test]
    fn eta_validity_tolerance() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut snapshot = EscalationSnapshot::default();
        assert!(snapshot.next_step_eta_is_valid(now));

        snapshot.next_step_eta = Some(now - Duration::minutes(4));
        assert!(snapshot.next_step_eta_is_valid(now));

        snapshot.next_step_eta = Some(now - Duration::minutes(6));
        assert!(!snapshot.next_step_eta_is_valid(now));

        snapshot.next_step_eta = Some(now + Duration::minutes(15));
        assert!(snapshot.next_step_eta_is_valid(now));
        assert!(!snapshot.step_is_due(now));
    }

    #[test]
    fn from_dict_rejects_cursor_out_of_range() {
        let mut snapshot = snapshot_with_orders(&[0, 1]);
        snapshot.last_active_escalation_policy_order = Some(5);
        let value = serde_json::to_value(&snapshot).unwrap();
        let err = EscalationSnapshot::from_dict(value).unwrap_err();
        assert!(matches!(err, EscalationError::Serialization(_)));
    }

    #[test]
    fn from_dict_rejects_unordered_policies() {
        let snapshot = snapshot_with_orders(&[42, 12]);
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(EscalationSnapshot::from_dict(value).is_err());
    }

    #[test]
    fn from_dict_rejects_garbage() {
        let err = EscalationSnapshot::from_dict(serde_json::json!({"escalation_policies_snapshots": 7}))
            .unwrap_err();
        assert!(matches!(err, EscalationError::Serialization(_)));
    }

    #[test]
    fn dict_exposes_runtime_fields() {
        let mut snapshot = snapshot_with_orders(&[0]);
        snapshot.escalation_policies_snapshots[0].escalation_counter = 2;
        let value = snapshot.to_dict().unwrap();
        assert_eq!(
            value["escalation_policies_snapshots"][0]["escalation_counter"],
            2
        );
        assert_eq!(value["last_active_escalation_policy_order"], serde_json::Value::Null);
        assert_eq!(EscalationSnapshot::from_dict(value).unwrap(), snapshot);
    }

    #[test]
    fn next_queue_user_only_for_queue_steps() {
        let mut policy = EscalationPolicySnapshot::new(
            "P1".into(),
            0,
            Step::users_queue(&users(&["A", "B"]), false),
        );
        assert_eq!(policy.next_queue_user(), Some(&UserId::new("A")));
        policy.last_notified_user = Some(UserId::new("A"));
        assert_eq!(policy.next_queue_user(), Some(&UserId::new("B")));

        let wait = EscalationPolicySnapshot::new("P2".into(), 1, Step::wait(None));
        assert_eq!(wait.next_queue_user(), None);
    }

    proptest! {
        #[test]
        fn round_robin_visits_every_user(len in 1usize..12, start in 0usize..12) {
            let queue: Vec<UserId> = (0..len).map(|i| UserId::new(format!("U{i}"))).collect();
            let mut last = queue.get(start % len).cloned();
            let mut seen = std::collections::HashSet::new();
            for _ in 0..len {
                let next = next_user_in_queue(&queue, last.as_ref()).cloned();
                prop_assert!(next.is_some());
                seen.insert(next.clone());
                last = next;
            }
            prop_assert_eq!(seen.len(), len);
        }
    }
}
