//! Escalation step types.
//!
//! - [`StepKind`]: the bare step tag stored on live policy rows
//! - [`Step`]: the typed step carried by a policy snapshot, each variant
//!   holding only its own configuration
//! - [`TimeWindow`]: time-of-day window used by the `NOTIFY_IF_TIME` gate

use std::time::Duration;

use chrono::{DateTime, Days, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActionId, GroupId, PolicyConfig, ScheduleId, UserId};

/// The type tag of an escalation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    /// Wait before continuing.
    Wait,
    /// Notify the next user of a round-robin queue.
    NotifyUsersQueue,
    /// Notify every listed user.
    NotifyMultipleUsers,
    /// Notify every member of a user group.
    NotifyGroup,
    /// Notify whoever is on call in a schedule.
    NotifySchedule,
    /// Continue only within a time-of-day window.
    NotifyIfTime,
    /// Continue only once enough alerts arrived in a trailing window.
    NotifyIfNumAlertsInWindow,
    /// Trigger an outgoing webhook.
    TriggerWebhook,
    /// Trigger a custom action button.
    TriggerCustomButton,
    /// Post to the route's whole channel.
    NotifyWholeChannel,
    /// Restart the chain from the first step.
    RepeatEscalation,
    /// Resolve the alert group.
    Resolve,
}

impl StepKind {
    /// Returns the tag as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Wait => "WAIT",
            Self::NotifyUsersQueue => "NOTIFY_USERS_QUEUE",
            Self::NotifyMultipleUsers => "NOTIFY_MULTIPLE_USERS",
            Self::NotifyGroup => "NOTIFY_GROUP",
            Self::NotifySchedule => "NOTIFY_SCHEDULE",
            Self::NotifyIfTime => "NOTIFY_IF_TIME",
            Self::NotifyIfNumAlertsInWindow => "NOTIFY_IF_NUM_ALERTS_IN_WINDOW",
            Self::TriggerWebhook => "TRIGGER_WEBHOOK",
            Self::TriggerCustomButton => "TRIGGER_CUSTOM_BUTTON",
            Self::NotifyWholeChannel => "NOTIFY_WHOLE_CHANNEL",
            Self::RepeatEscalation => "REPEAT_ESCALATION",
            Self::Resolve => "RESOLVE",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed escalation step with its frozen configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    /// Wait before continuing.
    Wait {
        /// Delay in seconds, unset means zero.
        wait_delay_secs: Option<u64>,
    },
    /// Notify the next user of a round-robin queue.
    NotifyUsersQueue {
        /// Users in queue order.
        users: Vec<UserId>,
        /// Use the users' important notification policy.
        important: bool,
    },
    /// Notify every listed user.
    NotifyMultipleUsers {
        /// Users to notify.
        users: Vec<UserId>,
        /// Use the users' important notification policy.
        important: bool,
    },
    /// Notify every member of a user group.
    NotifyGroup {
        /// Group to expand.
        group: Option<GroupId>,
        /// Use the users' important notification policy.
        important: bool,
    },
    /// Notify whoever is on call in a schedule.
    NotifySchedule {
        /// Schedule to resolve.
        schedule: Option<ScheduleId>,
        /// Use the users' important notification policy.
        important: bool,
    },
    /// Continue only within a time-of-day window.
    NotifyIfTime {
        /// Window start (organization local time).
        from_time: Option<NaiveTime>,
        /// Window end, exclusive.
        to_time: Option<NaiveTime>,
    },
    /// Continue only once enough alerts arrived in a trailing window.
    NotifyIfNumAlertsInWindow {
        /// Alert-count threshold.
        num_alerts_in_window: Option<u32>,
        /// Window length in minutes.
        num_minutes_in_window: Option<u32>,
    },
    /// Trigger an outgoing webhook.
    TriggerWebhook {
        /// Webhook id.
        webhook: Option<ActionId>,
    },
    /// Trigger a custom action button.
    TriggerCustomButton {
        /// Button id.
        button: Option<ActionId>,
    },
    /// Post to the route's whole channel.
    NotifyWholeChannel,
    /// Restart the chain from the first step.
    RepeatEscalation,
    /// Resolve the alert group.
    Resolve,
}

impl Step {
    /// Creates a WAIT step.
    #[must_use]
    pub const fn wait(wait_delay_secs: Option<u64>) -> Self {
        Self::Wait { wait_delay_secs }
    }

    /// Creates a NOTIFY_USERS_QUEUE step.
    #[must_use]
    pub fn users_queue(users: &[UserId], important: bool) -> Self {
        Self::NotifyUsersQueue {
            users: users.to_vec(),
            important,
        }
    }

    /// Creates a NOTIFY_MULTIPLE_USERS step.
    #[must_use]
    pub fn multiple_users(users: &[UserId], important: bool) -> Self {
        Self::NotifyMultipleUsers {
            users: users.to_vec(),
            important,
        }
    }

    /// Creates a NOTIFY_GROUP step.
    #[must_use]
    pub fn group(group: Option<&GroupId>, important: bool) -> Self {
        Self::NotifyGroup {
            group: group.cloned(),
            important,
        }
    }

    /// Creates a NOTIFY_SCHEDULE step.
    #[must_use]
    pub fn schedule(schedule: Option<&ScheduleId>, important: bool) -> Self {
        Self::NotifySchedule {
            schedule: schedule.cloned(),
            important,
        }
    }

    /// Creates a NOTIFY_IF_TIME step.
    #[must_use]
    pub const fn if_time(from_time: Option<NaiveTime>, to_time: Option<NaiveTime>) -> Self {
        Self::NotifyIfTime { from_time, to_time }
    }

    /// Creates a NOTIFY_IF_NUM_ALERTS_IN_WINDOW step.
    #[must_use]
    pub const fn if_num_alerts(
        num_alerts_in_window: Option<u32>,
        num_minutes_in_window: Option<u32>,
    ) -> Self {
        Self::NotifyIfNumAlertsInWindow {
            num_alerts_in_window,
            num_minutes_in_window,
        }
    }

    /// Materializes the typed step for a live policy row.
    ///
    /// Only the fields relevant to the row's step type are copied.
    #[must_use]
    pub fn from_policy(policy: &PolicyConfig) -> Self {
        match policy.step {
            StepKind::Wait => Self::wait(policy.wait_delay_secs),
            StepKind::NotifyUsersQueue => Self::users_queue(&policy.users, policy.important),
            StepKind::NotifyMultipleUsers => Self::multiple_users(&policy.users, policy.important),
            StepKind::NotifyGroup => Self::group(policy.group.as_ref(), policy.important),
            StepKind::NotifySchedule => Self::schedule(policy.schedule.as_ref(), policy.important),
            StepKind::NotifyIfTime => Self::if_time(policy.from_time, policy.to_time),
            StepKind::NotifyIfNumAlertsInWindow => {
                Self::if_num_alerts(policy.num_alerts_in_window, policy.num_minutes_in_window)
            }
            StepKind::TriggerWebhook => Self::TriggerWebhook {
                webhook: policy.action.clone(),
            },
            StepKind::TriggerCustomButton => Self::TriggerCustomButton {
                button: policy.action.clone(),
            },
            StepKind::NotifyWholeChannel => Self::NotifyWholeChannel,
            StepKind::RepeatEscalation => Self::RepeatEscalation,
            StepKind::Resolve => Self::Resolve,
        }
    }

    /// Returns the step's tag.
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        match self {
            Self::Wait { .. } => StepKind::Wait,
            Self::NotifyUsersQueue { .. } => StepKind::NotifyUsersQueue,
            Self::NotifyMultipleUsers { .. } => StepKind::NotifyMultipleUsers,
            Self::NotifyGroup { .. } => StepKind::NotifyGroup,
            Self::NotifySchedule { .. } => StepKind::NotifySchedule,
            Self::NotifyIfTime { .. } => StepKind::NotifyIfTime,
            Self::NotifyIfNumAlertsInWindow { .. } => StepKind::NotifyIfNumAlertsInWindow,
            Self::TriggerWebhook { .. } => StepKind::TriggerWebhook,
            Self::TriggerCustomButton { .. } => StepKind::TriggerCustomButton,
            Self::NotifyWholeChannel => StepKind::NotifyWholeChannel,
            Self::RepeatEscalation => StepKind::RepeatEscalation,
            Self::Resolve => StepKind::Resolve,
        }
    }

    /// Returns the WAIT delay, zero when unset. `None` for other steps.
    #[must_use]
    pub fn wait_delay(&self) -> Option<Duration> {
        match self {
            Self::Wait { wait_delay_secs } => {
                Some(Duration::from_secs(wait_delay_secs.unwrap_or(0)))
            }
            _ => None,
        }
    }
}

/// A time-of-day window `[from, to)`.
///
/// When `from > to` the window wraps past midnight. `from == to` covers the
/// whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start.
    pub from: NaiveTime,
    /// Exclusive end.
    pub to: NaiveTime,
}

impl TimeWindow {
    /// Creates a new window.
    #[must_use]
    pub const fn new(from: NaiveTime, to: NaiveTime) -> Self {
        Self { from, to }
    }

    /// Builds a window only when both bounds are configured.
    #[must_use]
    pub fn from_bounds(from: Option<NaiveTime>, to: Option<NaiveTime>) -> Option<Self> {
        Some(Self::new(from?, to?))
    }

    /// Returns true if the window wraps past midnight.
    #[must_use]
    pub fn wraps_midnight(&self) -> bool {
        self.from > self.to
    }

    /// Returns true if `time` falls inside the window.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.from == self.to {
            true
        } else if self.wraps_midnight() {
            time >= self.from || time < self.to
        } else {
            self.from <= time && time < self.to
        }
    }

    /// Returns the next instant strictly after `now` at which the window opens,
    /// interpreting the window in the given local offset.
    #[must_use]
    pub fn next_opening(&self, now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
        let local = now.with_timezone(&offset).naive_local();
        let mut candidate = local.date().and_time(self.from);
        if candidate <= local {
            candidate = candidate
                .checked_add_days(Days::new(1))
                .unwrap_or(candidate);
        }
        now + (candidate - local)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.from.format("%H:%M"), self.to.format("%H:%M"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test_case(hm(23, 30), true ; "late evening inside wrapped window")]
    #[test_case(hm(2, 0), true ; "early morning inside wrapped window")]
    #[test_case(hm(12, 0), false ; "noon outside wrapped window")]
    #[test_case(hm(22, 0), true ; "start is inclusive")]
    #[test_case(hm(6, 0), false ; "end is exclusive")]
    fn wrapped_window_contains(time: NaiveTime, expected: bool) {
        let window = TimeWindow::new(hm(22, 0), hm(6, 0));
        assert!(window.wraps_midnight());
        assert_eq!(window.contains(time), expected);
    }

    #[test_case(hm(10, 0), true ; "inside")]
    #[test_case(hm(8, 59), false ; "before")]
    #[test_case(hm(17, 0), false ; "at end")]
    fn plain_window_contains(time: NaiveTime, expected: bool) {
        let window = TimeWindow::new(hm(9, 0), hm(17, 0));
        assert_eq!(window.contains(time), expected);
    }

    #[test]
    fn equal_bounds_cover_whole_day() {
        let window = TimeWindow::new(hm(9, 0), hm(9, 0));
        assert!(window.contains(hm(3, 0)));
        assert!(window.contains(hm(21, 0)));
    }

    #[test]
    fn next_opening_later_today() {
        let window = TimeWindow::new(hm(9, 0), hm(17, 0));
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 7, 15, 0).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(
            window.next_opening(now, utc),
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_opening_tomorrow_with_offset() {
        let window = TimeWindow::new(hm(9, 0), hm(17, 0));
        // 18:00 local at UTC+2
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 16, 0, 0).unwrap();
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(
            window.next_opening(now, plus_two),
            Utc.with_ymd_and_hms(2024, 3, 2, 7, 0, 0).unwrap()
        );
    }

    #[test]
    fn from_policy_copies_only_relevant_fields() {
        let row = PolicyConfig::new("P1", 0, StepKind::NotifyGroup)
            .with_group("G1")
            .with_users(["U1"])
            .with_wait_delay_secs(60)
            .important();
        assert_eq!(
            Step::from_policy(&row),
            Step::NotifyGroup {
                group: Some("G1".into()),
                important: true,
            }
        );
    }

    #[test]
    fn wait_delay_defaults_to_zero() {
        assert_eq!(Step::wait(None).wait_delay(), Some(Duration::ZERO));
        assert_eq!(Step::RepeatEscalation.wait_delay(), None);
    }

    #[test]
    fn step_serializes_with_type_tag() {
        let json = serde_json::to_value(Step::wait(Some(900))).unwrap();
        assert_eq!(json["type"], "WAIT");
        assert_eq!(json["wait_delay_secs"], 900);

        let json = serde_json::to_value(Step::Resolve).unwrap();
        assert_eq!(json, serde_json::json!({"type": "RESOLVE"}));
    }

    #[test]
    fn kind_matches_tag_string() {
        let step = Step::if_num_alerts(Some(3), Some(10));
        assert_eq!(step.kind().as_str(), "NOTIFY_IF_NUM_ALERTS_IN_WINDOW");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], step.kind().as_str());
    }
}
