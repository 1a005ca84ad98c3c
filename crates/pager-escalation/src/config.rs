//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EscalationError, Result};

/// Upper bound for the recheck interval, the execution lease and WAIT delays (one year).
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// What a `NOTIFY_SCHEDULE` step does when nobody is on call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyScheduleBehavior {
    /// Log it and continue with the next step.
    #[default]
    Skip,
    /// Stop escalating the alert group.
    Stop,
}

/// Configuration for the escalation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often a paused escalation re-checks its pause flag (in seconds).
    pub paused_recheck_interval_secs: u64,
    /// How long an execution claim stays valid (in seconds).
    pub execution_lease_secs: u64,
    /// Maximum number of `REPEAT_ESCALATION` restarts per snapshot.
    pub max_repeats: u32,
    /// Maximum number of steps executed in a single invocation.
    pub max_steps_per_run: usize,
    /// Behavior of schedule steps without anyone on call.
    pub empty_schedule: EmptyScheduleBehavior,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            paused_recheck_interval_secs: 300, // 5 minutes
            execution_lease_secs: 300,
            max_repeats: 5,
            max_steps_per_run: 1000,
            empty_schedule: EmptyScheduleBehavior::Skip,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the paused re-check interval.
    #[must_use]
    pub const fn with_paused_recheck_interval(mut self, interval: Duration) -> Self {
        self.paused_recheck_interval_secs = interval.as_secs();
        self
    }

    /// Sets the execution lease.
    #[must_use]
    pub const fn with_execution_lease(mut self, lease: Duration) -> Self {
        self.execution_lease_secs = lease.as_secs();
        self
    }

    /// Sets the maximum number of chain repeats.
    #[must_use]
    pub const fn with_max_repeats(mut self, max_repeats: u32) -> Self {
        self.max_repeats = max_repeats;
        self
    }

    /// Sets the per-invocation step budget.
    #[must_use]
    pub const fn with_max_steps_per_run(mut self, max_steps: usize) -> Self {
        self.max_steps_per_run = max_steps;
        self
    }

    /// Sets the empty schedule behavior.
    #[must_use]
    pub const fn with_empty_schedule(mut self, behavior: EmptyScheduleBehavior) -> Self {
        self.empty_schedule = behavior;
        self
    }

    /// Returns the paused re-check interval.
    #[must_use]
    pub fn paused_recheck_interval(&self) -> chrono::Duration {
        seconds(self.paused_recheck_interval_secs)
    }

    /// Returns the execution lease.
    #[must_use]
    pub fn execution_lease(&self) -> chrono::Duration {
        seconds(self.execution_lease_secs)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `EscalationError::InvalidConfig` for zero intervals or budgets.
    pub fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("paused_recheck_interval_secs", self.paused_recheck_interval_secs),
            ("execution_lease_secs", self.execution_lease_secs),
        ] {
            if secs == 0 || secs > MAX_INTERVAL_SECS {
                return Err(EscalationError::InvalidConfig {
                    reason: format!("{name} must be between 1 and {MAX_INTERVAL_SECS}"),
                });
            }
        }
        if self.max_steps_per_run == 0 {
            return Err(EscalationError::InvalidConfig {
                reason: "max_steps_per_run must be positive".to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}
