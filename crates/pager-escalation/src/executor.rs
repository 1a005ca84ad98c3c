//! Step executor.
//!
//! [`StepExecutor::execute_actual_step`] walks the snapshot from the step
//! after the cursor, running every fall-through step in the same invocation
//! until it reaches a wait, a held gate, a stop or the end of the chain.
//! It only mutates the in-memory snapshot; persisting it is the caller's job.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collaborators::{Collaborators, NotificationContext};
use crate::config::{EmptyScheduleBehavior, EngineConfig, MAX_INTERVAL_SECS, seconds};
use crate::engine::StopReason;
use crate::error::EscalationError;
use crate::snapshot::{next_user_in_queue, ChannelFilterSnapshot, EscalationPolicySnapshot, EscalationSnapshot};
use crate::step::{Step, StepKind, TimeWindow};
use crate::types::{ActionId, AlertGroup, PolicyId, UserId};

/// How an invocation of the executor ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The snapshot is paused; nothing ran.
    Paused,
    /// Waiting for a wake-up at `eta`.
    Waiting {
        /// When the next step is due.
        eta: DateTime<Utc>,
    },
    /// Held at an alert-count gate until more alerts arrive.
    Held,
    /// Every step has run.
    Exhausted,
    /// Escalation must stop.
    Stopped {
        /// Why it stopped.
        reason: StopReason,
    },
}

/// What happened while executing a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    /// A user was notified.
    Notified {
        /// The user.
        user: UserId,
    },
    /// Notifying a user failed.
    NotificationFailed {
        /// The user.
        user: UserId,
        /// Failure description.
        reason: String,
    },
    /// A referenced user, group, schedule or action no longer exists.
    MissingEntity {
        /// Kind of entity.
        kind: String,
        /// Its id.
        id: String,
    },
    /// Resolving the recipients failed; nobody was notified.
    RecipientsUnavailable {
        /// Failure description.
        reason: String,
    },
    /// The step resolved to an empty recipient list.
    NoRecipients,
    /// Nobody was on call in the schedule.
    NobodyOnCall,
    /// The route's channel was notified.
    ChannelNotified,
    /// The route's channel could not be notified.
    ChannelUnavailable {
        /// Failure description.
        reason: String,
    },
    /// The step lacks configuration it needs.
    Misconfigured {
        /// What is missing.
        reason: String,
    },
    /// Waiting before the next step.
    Waiting {
        /// When the next step is due.
        until: DateTime<Utc>,
    },
    /// Current time is inside the configured window.
    InsideTimeWindow,
    /// Current time is outside the window; escalation resumes when it opens.
    OutsideTimeWindow {
        /// When the window next opens.
        resume_at: DateTime<Utc>,
    },
    /// Enough alerts arrived; escalation continues.
    AlertThresholdReached {
        /// Alerts counted in the window.
        count: usize,
    },
    /// Not enough alerts yet; escalation holds at this step.
    AlertThresholdNotReached {
        /// Alerts counted in the window.
        count: usize,
        /// Required count.
        threshold: u32,
    },
    /// An outgoing action was triggered.
    ActionTriggered {
        /// The action.
        action: ActionId,
    },
    /// Triggering an outgoing action failed.
    ActionFailed {
        /// The action.
        action: ActionId,
        /// Failure description.
        reason: String,
    },
    /// The chain restarts from the first step.
    Repeated {
        /// Repetition number, starting at 1.
        iteration: u32,
    },
    /// The chain was already repeated the maximum number of times.
    RepeatLimitReached,
    /// The alert group was resolved by the chain.
    Resolved,
    /// Resolving the alert group failed.
    ResolveFailed {
        /// Failure description.
        reason: String,
    },
    /// The step budget of this invocation ran out.
    StepBudgetExhausted,
}

impl LogEvent {
    /// Returns true for events describing a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::NotificationFailed { .. }
                | Self::MissingEntity { .. }
                | Self::RecipientsUnavailable { .. }
                | Self::ChannelUnavailable { .. }
                | Self::Misconfigured { .. }
                | Self::ActionFailed { .. }
                | Self::ResolveFailed { .. }
        )
    }
}

/// One entry of the escalation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationLogRecord {
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Policy being executed.
    pub policy_id: Option<PolicyId>,
    /// Step type of that policy.
    pub step: Option<StepKind>,
    /// What happened.
    #[serde(flatten)]
    pub event: LogEvent,
}

/// Everything an invocation of the executor did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// How the invocation ended.
    pub outcome: RunOutcome,
    /// Number of steps executed.
    pub steps_executed: usize,
    /// Users notified successfully, in order.
    pub notified: Vec<UserId>,
    /// Log records in order.
    pub log: Vec<EscalationLogRecord>,
}

impl ExecutionReport {
    fn new() -> Self {
        Self {
            outcome: RunOutcome::Exhausted,
            steps_executed: 0,
            notified: Vec::new(),
            log: Vec::new(),
        }
    }

    /// Creates a report for an invocation that did nothing.
    #[must_use]
    pub const fn idle(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            steps_executed: 0,
            notified: Vec::new(),
            log: Vec::new(),
        }
    }

    fn record(
        &mut self,
        at: DateTime<Utc>,
        policy: Option<(&PolicyId, StepKind)>,
        alert_group: &AlertGroup,
        event: LogEvent,
    ) {
        let (policy_id, step) = policy.map_or((None, None), |(id, kind)| (Some(id.clone()), Some(kind)));
        if event.is_failure() {
            warn!(
                alert_group_id = %alert_group.id,
                policy_id = ?policy_id,
                step = ?step,
                event = ?event,
                "escalation step failure"
            );
        } else {
            debug!(
                alert_group_id = %alert_group.id,
                policy_id = ?policy_id,
                step = ?step,
                event = ?event,
                "escalation step"
            );
        }
        self.log.push(EscalationLogRecord {
            at,
            policy_id,
            step,
            event,
        });
    }
}

/// How the loop proceeds after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepFlow {
    /// Advance the cursor and run the next step now.
    Continue,
    /// Advance the cursor and wait until the given time.
    Wait(DateTime<Utc>),
    /// Keep the cursor before this step.
    Hold,
    /// Reset the cursor and start from the first step.
    Restart,
    /// Advance the cursor and stop escalating.
    Stop(StopReason),
}

/// Executes escalation steps against the collaborators.
#[derive(Debug, Clone, Copy)]
pub struct StepExecutor<'a> {
    collaborators: &'a Collaborators,
    config: &'a EngineConfig,
}

impl<'a> StepExecutor<'a> {
    /// Creates an executor.
    #[must_use]
    pub const fn new(collaborators: &'a Collaborators, config: &'a EngineConfig) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    /// Runs steps from the one after the cursor until the escalation has to
    /// wait, hold, stop, or runs out of steps.
    pub fn execute_actual_step(
        &self,
        snapshot: &mut EscalationSnapshot,
        alert_group: &AlertGroup,
        now: DateTime<Utc>,
    ) -> ExecutionReport {
        if snapshot.pause_escalation {
            debug!(alert_group_id = %alert_group.id, "escalation paused, not executing");
            return ExecutionReport::idle(RunOutcome::Paused);
        }

        let mut report = ExecutionReport::new();
        snapshot.next_step_eta = None;

        loop {
            let Some(index) = snapshot.next_active_policy_index() else {
                report.outcome = RunOutcome::Exhausted;
                break;
            };
            if report.steps_executed >= self.config.max_steps_per_run {
                report.record(now, None, alert_group, LogEvent::StepBudgetExhausted);
                snapshot.next_step_eta = Some(now);
                report.outcome = RunOutcome::Waiting { eta: now };
                break;
            }
            report.steps_executed += 1;

            let flow = self.execute_policy(
                &mut snapshot.escalation_policies_snapshots[index],
                snapshot.channel_filter_snapshot.as_ref(),
                alert_group,
                now,
                &mut report,
            );

            match flow {
                StepFlow::Continue => {
                    snapshot.last_active_escalation_policy_order = Some(index);
                }
                StepFlow::Wait(eta) => {
                    snapshot.last_active_escalation_policy_order = Some(index);
                    snapshot.next_step_eta = Some(eta);
                    report.outcome = RunOutcome::Waiting { eta };
                    break;
                }
                StepFlow::Hold => {
                    report.outcome = RunOutcome::Held;
                    break;
                }
                StepFlow::Restart => {
                    snapshot.last_active_escalation_policy_order = None;
                }
                StepFlow::Stop(reason) => {
                    snapshot.last_active_escalation_policy_order = Some(index);
                    report.outcome = RunOutcome::Stopped { reason };
                    break;
                }
            }
        }

        info!(
            alert_group_id = %alert_group.id,
            steps = report.steps_executed,
            notified = report.notified.len(),
            cursor = ?snapshot.last_active_escalation_policy_order,
            outcome = ?report.outcome,
            "executed escalation steps"
        );
        report
    }

    fn execute_policy(
        &self,
        policy: &mut EscalationPolicySnapshot,
        channel_filter: Option<&ChannelFilterSnapshot>,
        alert_group: &AlertGroup,
        now: DateTime<Utc>,
        report: &mut ExecutionReport,
    ) -> StepFlow {
        let step = policy.step.clone();
        let kind = step.kind();
        let id = policy.id.clone();
        let tag = Some((&id, kind));

        match step {
            Step::Wait { .. } => {
                // Delays beyond the interval cap are clamped to it.
                let delay = policy
                    .step
                    .wait_delay()
                    .map_or(0, |delay| delay.as_secs().min(MAX_INTERVAL_SECS));
                let eta = now
                    .checked_add_signed(seconds(delay))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                report.record(now, tag, alert_group, LogEvent::Waiting { until: eta });
                StepFlow::Wait(eta)
            }
            Step::NotifyUsersQueue { users, important } => {
                let Some(user) = next_user_in_queue(&users, policy.last_notified_user.as_ref()).cloned()
                else {
                    report.record(now, tag, alert_group, misconfigured("users queue is empty"));
                    return StepFlow::Continue;
                };
                let context = NotificationContext {
                    policy_id: id.clone(),
                    step: kind,
                    important,
                };
                self.notify_users(std::slice::from_ref(&user), &context, alert_group, now, report);
                policy.last_notified_user = Some(user);
                StepFlow::Continue
            }
            Step::NotifyMultipleUsers { users, important } => {
                if users.is_empty() {
                    report.record(now, tag, alert_group, misconfigured("no users selected"));
                    return StepFlow::Continue;
                }
                let context = NotificationContext {
                    policy_id: id.clone(),
                    step: kind,
                    important,
                };
                self.notify_users(&users, &context, alert_group, now, report);
                StepFlow::Continue
            }
            Step::NotifyGroup { group, important } => {
                let Some(group) = group else {
                    report.record(now, tag, alert_group, misconfigured("group is not set"));
                    return StepFlow::Continue;
                };
                match self.collaborators.groups.members(&group) {
                    Ok(members) if members.is_empty() => {
                        report.record(now, tag, alert_group, LogEvent::NoRecipients);
                    }
                    Ok(members) => {
                        let context = NotificationContext {
                            policy_id: id.clone(),
                            step: kind,
                            important,
                        };
                        self.notify_users(&members, &context, alert_group, now, report);
                    }
                    Err(err) => report.record(now, tag, alert_group, recipients_error(&err)),
                }
                StepFlow::Continue
            }
            Step::NotifySchedule {
                schedule,
                important,
            } => {
                let Some(schedule) = schedule else {
                    report.record(now, tag, alert_group, misconfigured("schedule is not set"));
                    return StepFlow::Continue;
                };
                match self.collaborators.schedules.on_call_now(&schedule, now) {
                    Ok(on_call) if on_call.is_empty() => {
                        report.record(now, tag, alert_group, LogEvent::NobodyOnCall);
                        if self.config.empty_schedule == EmptyScheduleBehavior::Stop {
                            return StepFlow::Stop(StopReason::NobodyOnCall);
                        }
                    }
                    Ok(on_call) => {
                        let context = NotificationContext {
                            policy_id: id.clone(),
                            step: kind,
                            important,
                        };
                        self.notify_users(&on_call, &context, alert_group, now, report);
                    }
                    Err(err) => report.record(now, tag, alert_group, recipients_error(&err)),
                }
                StepFlow::Continue
            }
            Step::NotifyIfTime { from_time, to_time } => {
                let Some(window) = TimeWindow::from_bounds(from_time, to_time) else {
                    report.record(now, tag, alert_group, misconfigured("time window is not set"));
                    return StepFlow::Continue;
                };
                if window.contains(alert_group.local_time(now)) {
                    report.record(now, tag, alert_group, LogEvent::InsideTimeWindow);
                    StepFlow::Continue
                } else {
                    let resume_at = window.next_opening(now, alert_group.utc_offset());
                    report.record(now, tag, alert_group, LogEvent::OutsideTimeWindow { resume_at });
                    StepFlow::Wait(resume_at)
                }
            }
            Step::NotifyIfNumAlertsInWindow {
                num_alerts_in_window,
                num_minutes_in_window,
            } => {
                let (Some(threshold), Some(minutes)) = (num_alerts_in_window, num_minutes_in_window)
                else {
                    report.record(now, tag, alert_group, misconfigured("alert window is not set"));
                    return StepFlow::Continue;
                };
                let since = now - Duration::minutes(i64::from(minutes));
                let count = self
                    .collaborators
                    .alert_groups
                    .count_alerts_since(&alert_group.id, since);
                if count >= threshold as usize {
                    policy.escalation_counter += 1;
                    policy.pause_escalation = false;
                    report.record(now, tag, alert_group, LogEvent::AlertThresholdReached { count });
                    StepFlow::Continue
                } else {
                    policy.passed_last_time = Some(now);
                    if !policy.pause_escalation {
                        report.record(
                            now,
                            tag,
                            alert_group,
                            LogEvent::AlertThresholdNotReached { count, threshold },
                        );
                    }
                    policy.pause_escalation = true;
                    StepFlow::Hold
                }
            }
            Step::TriggerWebhook { webhook: action } | Step::TriggerCustomButton { button: action } => {
                let Some(action) = action else {
                    report.record(now, tag, alert_group, misconfigured("action is not set"));
                    return StepFlow::Continue;
                };
                let event = match self.collaborators.actions.trigger(&action, &alert_group.id) {
                    Ok(()) => LogEvent::ActionTriggered { action },
                    Err(err) => LogEvent::ActionFailed {
                        action,
                        reason: err.to_string(),
                    },
                };
                report.record(now, tag, alert_group, event);
                StepFlow::Continue
            }
            Step::NotifyWholeChannel => {
                let event = match channel_filter {
                    Some(filter) => match self
                        .collaborators
                        .dispatcher
                        .notify_channel(&alert_group.id, filter)
                    {
                        Ok(()) => LogEvent::ChannelNotified,
                        Err(err) => LogEvent::ChannelUnavailable {
                            reason: err.to_string(),
                        },
                    },
                    None => LogEvent::ChannelUnavailable {
                        reason: "route was deleted".to_string(),
                    },
                };
                report.record(now, tag, alert_group, event);
                StepFlow::Continue
            }
            Step::RepeatEscalation => {
                if policy.escalation_counter < self.config.max_repeats {
                    policy.escalation_counter += 1;
                    report.record(
                        now,
                        tag,
                        alert_group,
                        LogEvent::Repeated {
                            iteration: policy.escalation_counter,
                        },
                    );
                    StepFlow::Restart
                } else {
                    report.record(now, tag, alert_group, LogEvent::RepeatLimitReached);
                    StepFlow::Continue
                }
            }
            Step::Resolve => match self.collaborators.actions.resolve_alert_group(&alert_group.id) {
                Ok(()) => {
                    report.record(now, tag, alert_group, LogEvent::Resolved);
                    StepFlow::Stop(StopReason::ResolvedByEscalation)
                }
                Err(err) => {
                    report.record(
                        now,
                        tag,
                        alert_group,
                        LogEvent::ResolveFailed {
                            reason: err.to_string(),
                        },
                    );
                    StepFlow::Continue
                }
            },
        }
    }

    /// Notifies each user independently; one failure never affects the others.
    fn notify_users(
        &self,
        users: &[UserId],
        context: &NotificationContext,
        alert_group: &AlertGroup,
        now: DateTime<Utc>,
        report: &mut ExecutionReport,
    ) {
        let tag = Some((&context.policy_id, context.step));
        for user in users {
            let event = match self
                .collaborators
                .dispatcher
                .notify(user, &alert_group.id, context)
            {
                Ok(()) => {
                    report.notified.push(user.clone());
                    LogEvent::Notified { user: user.clone() }
                }
                Err(EscalationError::MissingEntity { kind, id }) => LogEvent::MissingEntity {
                    kind: kind.to_string(),
                    id,
                },
                Err(err) => LogEvent::NotificationFailed {
                    user: user.clone(),
                    reason: err.to_string(),
                },
            };
            report.record(now, tag, alert_group, event);
        }
    }
}

fn misconfigured(reason: &str) -> LogEvent {
    LogEvent::Misconfigured {
        reason: reason.to_string(),
    }
}

fn recipients_error(err: &EscalationError) -> LogEvent {
    match err {
        EscalationError::MissingEntity { kind, id } => LogEvent::MissingEntity {
            kind: (*kind).to_string(),
            id: id.clone(),
        },
        other => LogEvent::RecipientsUnavailable {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKit;
    use crate::snapshot::EscalationPolicySnapshot;
    use crate::types::{GroupId, ScheduleId};
    use chrono::{NaiveTime, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn users(ids: &[&str]) -> Vec<UserId> {
        ids.iter().map(|id| UserId::new(*id)).collect()
    }

    fn snapshot(steps: Vec<Step>) -> EscalationSnapshot {
        EscalationSnapshot {
            escalation_policies_snapshots: steps
                .into_iter()
                .enumerate()
                .map(|(i, step)| {
                    let order = u32::try_from(i).unwrap();
                    EscalationPolicySnapshot::new(PolicyId::new(format!("P{i}")), order, step)
                })
                .collect(),
            ..EscalationSnapshot::default()
        }
    }

    fn run(kit: &InMemoryKit, snapshot: &mut EscalationSnapshot, now: DateTime<Utc>) -> ExecutionReport {
        let config = EngineConfig::default();
        run_with(kit, &config, snapshot, now)
    }

    fn run_with(
        kit: &InMemoryKit,
        config: &EngineConfig,
        snapshot: &mut EscalationSnapshot,
        now: DateTime<Utc>,
    ) -> ExecutionReport {
        let alert_group = AlertGroup::firing("AG1", None);
        StepExecutor::new(&kit.collaborators, config).execute_actual_step(snapshot, &alert_group, now)
    }

    #[test]
    fn fall_through_runs_whole_chain_without_waits() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![
            Step::multiple_users(&users(&["U1"]), false),
            Step::users_queue(&users(&["U2", "U3"]), false),
            Step::TriggerWebhook {
                webhook: Some("W1".into()),
            },
            Step::if_time(Some(hm(0, 0)), Some(hm(0, 0))),
        ]);
        let report = run(&kit, &mut snap, at(10, 0));

        assert_eq!(report.outcome, RunOutcome::Exhausted);
        assert_eq!(report.steps_executed, 4);
        assert_eq!(snap.last_active_escalation_policy_order, Some(3));
        assert_eq!(report.notified, users(&["U1", "U2"]));
        assert_eq!(kit.actions.triggered(), vec![("W1".into(), "AG1".into())]);
    }

    #[test]
    fn wait_stops_and_sets_eta() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![Step::wait(Some(900)), Step::multiple_users(&users(&["U1"]), false)]);
        let report = run(&kit, &mut snap, at(10, 0));

        assert_eq!(report.outcome, RunOutcome::Waiting { eta: at(10, 15) });
        assert_eq!(snap.last_active_escalation_policy_order, Some(0));
        assert_eq!(snap.next_step_eta, Some(at(10, 15)));
        assert!(report.notified.is_empty());
    }

    #[test]
    fn unset_wait_delay_is_zero() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![Step::wait(None)]);
        let report = run(&kit, &mut snap, at(10, 0));
        assert_eq!(report.outcome, RunOutcome::Waiting { eta: at(10, 0) });
    }

    #[test]
    fn oversized_wait_delay_is_clamped() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![Step::wait(Some(u64::MAX))]);
        let report = run(&kit, &mut snap, at(10, 0));
        let eta = at(10, 0) + Duration::days(365);
        assert_eq!(report.outcome, RunOutcome::Waiting { eta });
        assert_eq!(snap.next_step_eta, Some(eta));
    }

    #[test]
    fn users_queue_rotates_across_runs() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![Step::users_queue(&users(&["A", "B", "C"]), false)]);

        let mut notified = Vec::new();
        for _ in 0..4 {
            snap.last_active_escalation_policy_order = None;
            notified.extend(run(&kit, &mut snap, at(10, 0)).notified);
        }
        assert_eq!(notified, users(&["A", "B", "C", "A"]));
    }

    #[test]
    fn failed_user_does_not_block_others() {
        let kit = InMemoryKit::new();
        kit.dispatcher.fail_for("U2");
        let mut snap = snapshot(vec![
            Step::multiple_users(&users(&["U1", "U2", "U3"]), true),
            Step::multiple_users(&users(&["U4"]), false),
        ]);
        let report = run(&kit, &mut snap, at(10, 0));

        assert_eq!(report.notified, users(&["U1", "U3", "U4"]));
        assert_eq!(snap.last_active_escalation_policy_order, Some(1));
        assert!(report
            .log
            .iter()
            .any(|r| matches!(&r.event, LogEvent::NotificationFailed { user, .. } if user.as_str() == "U2")));
    }

    #[test]
    fn group_members_are_notified() {
        let kit = InMemoryKit::new();
        kit.directory.put_group(GroupId::new("G1"), users(&["U1", "U2"]));
        let mut snap = snapshot(vec![Step::group(Some(&GroupId::new("G1")), false)]);
        let report = run(&kit, &mut snap, at(10, 0));
        assert_eq!(report.notified, users(&["U1", "U2"]));
    }

    #[test]
    fn missing_group_notifies_nobody_and_advances() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![
            Step::group(Some(&GroupId::new("gone")), false),
            Step::multiple_users(&users(&["U9"]), false),
        ]);
        let report = run(&kit, &mut snap, at(10, 0));
        assert_eq!(report.notified, users(&["U9"]));
        assert!(matches!(report.log[0].event, LogEvent::MissingEntity { .. }));
        assert_eq!(report.outcome, RunOutcome::Exhausted);
    }

    #[test]
    fn schedule_on_call_users_are_notified() {
        let kit = InMemoryKit::new();
        kit.directory
            .put_schedule(ScheduleId::new("S1"), users(&["U5"]));
        let mut snap = snapshot(vec![Step::schedule(Some(&ScheduleId::new("S1")), true)]);
        let report = run(&kit, &mut snap, at(10, 0));
        assert_eq!(report.notified, users(&["U5"]));
        let sent = kit.dispatcher.sent();
        assert!(sent[0].2.important);
    }

    #[test]
    fn empty_schedule_skips_by_default() {
        let kit = InMemoryKit::new();
        kit.directory.put_schedule(ScheduleId::new("S1"), Vec::new());
        let mut snap = snapshot(vec![
            Step::schedule(Some(&ScheduleId::new("S1")), false),
            Step::multiple_users(&users(&["U1"]), false),
        ]);
        let report = run(&kit, &mut snap, at(10, 0));
        assert_eq!(report.notified, users(&["U1"]));
        assert_eq!(report.log[0].event, LogEvent::NobodyOnCall);
    }

    #[test]
    fn empty_schedule_can_stop() {
        let kit = InMemoryKit::new();
        kit.directory.put_schedule(ScheduleId::new("S1"), Vec::new());
        let config = EngineConfig::default().with_empty_schedule(EmptyScheduleBehavior::Stop);
        let mut snap = snapshot(vec![
            Step::schedule(Some(&ScheduleId::new("S1")), false),
            Step::multiple_users(&users(&["U1"]), false),
        ]);
        let report = run_with(&kit, &config, &mut snap, at(10, 0));
        assert_eq!(
            report.outcome,
            RunOutcome::Stopped {
                reason: StopReason::NobodyOnCall
            }
        );
        assert!(report.notified.is_empty());
    }

    #[test]
    fn time_gate_outside_window_waits_for_opening() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![
            Step::if_time(Some(hm(9, 0)), Some(hm(17, 0))),
            Step::multiple_users(&users(&["U1"]), false),
        ]);
        let report = run(&kit, &mut snap, at(18, 0));

        let tomorrow_nine = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        assert_eq!(report.outcome, RunOutcome::Waiting { eta: tomorrow_nine });
        assert_eq!(snap.last_active_escalation_policy_order, Some(0));
        assert!(report.notified.is_empty());
    }

    #[test]
    fn alert_count_gate_holds_then_passes() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![
            Step::if_num_alerts(Some(2), Some(10)),
            Step::multiple_users(&users(&["U1"]), false),
        ]);
        kit.directory.push_alert(&"AG1".into(), at(9, 55));

        let report = run(&kit, &mut snap, at(10, 0));
        assert_eq!(report.outcome, RunOutcome::Held);
        assert_eq!(snap.last_active_escalation_policy_order, None);
        let gate = &snap.escalation_policies_snapshots[0];
        assert!(gate.pause_escalation);
        assert_eq!(gate.passed_last_time, Some(at(10, 0)));
        assert_eq!(gate.escalation_counter, 0);

        kit.directory.push_alert(&"AG1".into(), at(10, 1));
        let report = run(&kit, &mut snap, at(10, 2));
        assert_eq!(report.outcome, RunOutcome::Exhausted);
        assert_eq!(report.notified, users(&["U1"]));
        let gate = &snap.escalation_policies_snapshots[0];
        assert!(!gate.pause_escalation);
        assert_eq!(gate.escalation_counter, 1);
    }

    #[test]
    fn old_alerts_fall_outside_window() {
        let kit = InMemoryKit::new();
        kit.directory.push_alert(&"AG1".into(), at(8, 0));
        kit.directory.push_alert(&"AG1".into(), at(8, 1));
        let mut snap = snapshot(vec![Step::if_num_alerts(Some(2), Some(10))]);
        assert_eq!(run(&kit, &mut snap, at(10, 0)).outcome, RunOutcome::Held);
    }

    #[test]
    fn webhook_failure_is_logged_and_skipped() {
        let kit = InMemoryKit::new();
        kit.actions.fail_for("W1");
        let mut snap = snapshot(vec![
            Step::TriggerCustomButton {
                button: Some("W1".into()),
            },
            Step::multiple_users(&users(&["U1"]), false),
        ]);
        let report = run(&kit, &mut snap, at(10, 0));
        assert!(matches!(report.log[0].event, LogEvent::ActionFailed { .. }));
        assert_eq!(report.notified, users(&["U1"]));
    }

    #[test]
    fn repeat_restarts_chain_until_limit() {
        let kit = InMemoryKit::new();
        let config = EngineConfig::default().with_max_repeats(2);
        let mut snap = snapshot(vec![
            Step::multiple_users(&users(&["U1"]), false),
            Step::RepeatEscalation,
        ]);
        let report = run_with(&kit, &config, &mut snap, at(10, 0));

        assert_eq!(report.notified, users(&["U1", "U1", "U1"]));
        assert_eq!(report.outcome, RunOutcome::Exhausted);
        assert_eq!(snap.escalation_policies_snapshots[1].escalation_counter, 2);
        assert_eq!(report.log.last().unwrap().event, LogEvent::RepeatLimitReached);
    }

    #[test]
    fn resolve_step_stops_escalation() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![Step::Resolve, Step::multiple_users(&users(&["U1"]), false)]);
        let report = run(&kit, &mut snap, at(10, 0));
        assert_eq!(
            report.outcome,
            RunOutcome::Stopped {
                reason: StopReason::ResolvedByEscalation
            }
        );
        assert_eq!(snap.last_active_escalation_policy_order, Some(0));
        assert_eq!(kit.actions.resolved(), vec!["AG1".into()]);
    }

    #[test]
    fn whole_channel_without_route_is_logged() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![Step::NotifyWholeChannel]);
        let report = run(&kit, &mut snap, at(10, 0));
        assert!(matches!(report.log[0].event, LogEvent::ChannelUnavailable { .. }));
        assert_eq!(report.outcome, RunOutcome::Exhausted);
    }

    #[test]
    fn misconfigured_steps_advance() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![
            Step::group(None, false),
            Step::schedule(None, false),
            Step::if_time(None, Some(hm(1, 0))),
            Step::if_num_alerts(Some(1), None),
            Step::TriggerWebhook { webhook: None },
            Step::users_queue(&[], false),
            Step::multiple_users(&[], false),
        ]);
        let report = run(&kit, &mut snap, at(10, 0));
        assert_eq!(report.outcome, RunOutcome::Exhausted);
        assert_eq!(snap.last_active_escalation_policy_order, Some(6));
        assert!(report.log.iter().all(|r| matches!(r.event, LogEvent::Misconfigured { .. })));
    }

    #[test]
    fn step_budget_defers_remaining_work() {
        let kit = InMemoryKit::new();
        let config = EngineConfig::default().with_max_steps_per_run(2);
        let mut snap = snapshot(vec![
            Step::multiple_users(&users(&["U1"]), false),
            Step::multiple_users(&users(&["U2"]), false),
            Step::multiple_users(&users(&["U3"]), false),
        ]);
        let report = run_with(&kit, &config, &mut snap, at(10, 0));
        assert_eq!(report.outcome, RunOutcome::Waiting { eta: at(10, 0) });
        assert_eq!(snap.last_active_escalation_policy_order, Some(1));
        assert_eq!(report.notified, users(&["U1", "U2"]));
    }

    #[test]
    fn paused_snapshot_does_nothing() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![Step::multiple_users(&users(&["U1"]), false)]);
        snap.pause_escalation = true;
        let report = run(&kit, &mut snap, at(10, 0));
        assert_eq!(report.outcome, RunOutcome::Paused);
        assert!(kit.dispatcher.sent().is_empty());
        assert_eq!(snap.last_active_escalation_policy_order, None);
    }

    #[test]
    fn exhausted_snapshot_is_noop() {
        let kit = InMemoryKit::new();
        let mut snap = snapshot(vec![Step::multiple_users(&users(&["U1"]), false)]);
        snap.last_active_escalation_policy_order = Some(0);
        let report = run(&kit, &mut snap, at(10, 0));
        assert_eq!(report.outcome, RunOutcome::Exhausted);
        assert_eq!(report.steps_executed, 0);
    }
}
