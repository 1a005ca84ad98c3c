//! Identifiers and the live configuration shapes read through collaborators.
//!
//! The types here describe what the rest of the platform owns: alert groups,
//! routes (channel filters), chains and their policy rows. The engine only
//! ever reads them through [`crate::collaborators::ChainReader`] and
//! [`crate::collaborators::AlertGroupSource`]; once a snapshot is built the
//! live shapes are no longer consulted.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::StopReason;
use crate::step::StepKind;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new id from a string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id!(
    /// Identifier of an alert group (the unit being escalated).
    AlertGroupId
);
string_id!(
    /// Identifier of a user that can be notified.
    UserId
);
string_id!(
    /// Identifier of an on-call schedule.
    ScheduleId
);
string_id!(
    /// Identifier of a user group.
    GroupId
);
string_id!(
    /// Identifier of an outgoing webhook or custom button.
    ActionId
);
string_id!(
    /// Identifier of an escalation chain.
    ChainId
);
string_id!(
    /// Identifier of a route (channel filter).
    ChannelFilterId
);
string_id!(
    /// Identifier of an escalation policy row.
    PolicyId
);

/// Where an alert group currently stands in its own lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AlertGroupStatus {
    /// Still firing, escalation may proceed.
    #[default]
    Firing,
    /// Somebody acknowledged the alert group.
    Acknowledged,
    /// The alert group was resolved.
    Resolved,
    /// The alert group was silenced.
    Silenced,
    /// The alert group was attached to another (root) alert group.
    Attached {
        /// The root alert group it now belongs to.
        root: AlertGroupId,
    },
}

impl AlertGroupStatus {
    /// Returns the stop reason implied by this status, if escalation must not run.
    #[must_use]
    pub const fn stop_reason(&self) -> Option<StopReason> {
        match self {
            Self::Firing => None,
            Self::Acknowledged => Some(StopReason::Acknowledged),
            Self::Resolved => Some(StopReason::Resolved),
            Self::Silenced => Some(StopReason::Silenced),
            Self::Attached { .. } => Some(StopReason::Attached),
        }
    }
}

/// A read-only view of an alert group as provided by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertGroup {
    /// Alert group id.
    pub id: AlertGroupId,
    /// Route the alert group was assigned to, if it still exists.
    #[serde(default)]
    pub channel_filter_id: Option<ChannelFilterId>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: AlertGroupStatus,
    /// Organization UTC offset in seconds, used for time-of-day gates.
    #[serde(default)]
    pub utc_offset_secs: i32,
}

impl AlertGroup {
    /// Creates a firing alert group routed through `channel_filter_id`.
    #[must_use]
    pub fn firing(id: impl Into<AlertGroupId>, channel_filter_id: Option<ChannelFilterId>) -> Self {
        Self {
            id: id.into(),
            channel_filter_id,
            status: AlertGroupStatus::Firing,
            utc_offset_secs: 0,
        }
    }

    /// Sets the organization UTC offset.
    #[must_use]
    pub const fn with_utc_offset_secs(mut self, secs: i32) -> Self {
        self.utc_offset_secs = secs;
        self
    }

    /// Returns true if escalation may still run for this alert group.
    #[must_use]
    pub const fn is_escalating(&self) -> bool {
        self.status.stop_reason().is_none()
    }

    /// Returns the organization offset, UTC when the stored value is out of range.
    #[must_use]
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs).unwrap_or_else(|| Utc.fix())
    }

    /// Converts `now` to the organization's local time of day.
    #[must_use]
    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&self.utc_offset()).time()
    }
}

/// Per-backend notification settings of a route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Whether the backend receives notifications for this route.
    pub enabled: bool,
    /// Backend-specific channel (chat channel id, mail list, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// The escalation chain a route points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain id.
    pub id: ChainId,
    /// Chain display name.
    pub name: String,
}

/// A route (channel filter) as currently configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route id.
    pub id: ChannelFilterId,
    /// Display label shown to clients.
    pub label: String,
    /// Whether this is the integration's catch-all route.
    #[serde(default)]
    pub is_default: bool,
    /// Notification backend settings keyed by backend name.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendSettings>,
    /// The chain this route escalates through, if any.
    #[serde(default)]
    pub chain: Option<ChainConfig>,
}

/// A live escalation policy row.
///
/// Rows share one schema for every step type; fields irrelevant to `step`
/// are simply left empty. The snapshot builder turns a row into a typed
/// [`crate::step::Step`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Policy id.
    pub id: PolicyId,
    /// Position in the chain (strictly increasing, not necessarily dense).
    pub order: u32,
    /// Step type.
    pub step: StepKind,
    /// Use the "important" notification policy of the targets.
    #[serde(default)]
    pub important: bool,
    /// WAIT delay.
    #[serde(default)]
    pub wait_delay_secs: Option<u64>,
    /// Users for queue / multiple-user steps.
    #[serde(default)]
    pub users: Vec<UserId>,
    /// Group for group steps.
    #[serde(default)]
    pub group: Option<GroupId>,
    /// Schedule for schedule steps.
    #[serde(default)]
    pub schedule: Option<ScheduleId>,
    /// Start of the time-of-day window.
    #[serde(default)]
    pub from_time: Option<NaiveTime>,
    /// End of the time-of-day window.
    #[serde(default)]
    pub to_time: Option<NaiveTime>,
    /// Alert-count threshold.
    #[serde(default)]
    pub num_alerts_in_window: Option<u32>,
    /// Alert-count window length.
    #[serde(default)]
    pub num_minutes_in_window: Option<u32>,
    /// Webhook or custom button.
    #[serde(default)]
    pub action: Option<ActionId>,
}

impl PolicyConfig {
    /// Creates an empty row of the given step type.
    #[must_use]
    pub fn new(id: impl Into<PolicyId>, order: u32, step: StepKind) -> Self {
        Self {
            id: id.into(),
            order,
            step,
            important: false,
            wait_delay_secs: None,
            users: Vec::new(),
            group: None,
            schedule: None,
            from_time: None,
            to_time: None,
            num_alerts_in_window: None,
            num_minutes_in_window: None,
            action: None,
        }
    }

    /// Sets the wait delay.
    #[must_use]
    pub const fn with_wait_delay_secs(mut self, secs: u64) -> Self {
        self.wait_delay_secs = Some(secs);
        self
    }

    /// Sets the users list.
    #[must_use]
    pub fn with_users<I, U>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<UserId>,
    {
        self.users = users.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<GroupId>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Sets the schedule.
    #[must_use]
    pub fn with_schedule(mut self, schedule: impl Into<ScheduleId>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    /// Sets the time-of-day window.
    #[must_use]
    pub const fn with_time_window(mut self, from: NaiveTime, to: NaiveTime) -> Self {
        self.from_time = Some(from);
        self.to_time = Some(to);
        self
    }

    /// Sets the alert-count window.
    #[must_use]
    pub const fn with_alert_window(mut self, num_alerts: u32, num_minutes: u32) -> Self {
        self.num_alerts_in_window = Some(num_alerts);
        self.num_minutes_in_window = Some(num_minutes);
        self
    }

    /// Sets the webhook or button id.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<ActionId>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Marks the step as important.
    #[must_use]
    pub const fn important(mut self) -> Self {
        self.important = true;
        self
    }
}
