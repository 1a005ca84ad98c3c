//! Test helpers for escalation integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use pager_escalation::{
    AlertGroup, AlertGroupId, BackendRegistry, ChainConfig, ChannelFilterId, Engine, EngineConfig,
    InMemoryKit, PolicyConfig, RouteConfig, StepKind, Wakeup,
};

/// Alert group used by every scenario.
pub const ALERT_GROUP: &str = "AG1";

/// Returns 2024-03-01 at `h:m` UTC.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
}

/// Returns the scenario alert group id.
pub fn alert_group_id() -> AlertGroupId {
    AlertGroupId::new(ALERT_GROUP)
}

/// In-memory engine with a single route `R1` pointing at chain `CH1`.
pub struct Harness {
    pub kit: InMemoryKit,
    pub engine: Engine,
}

impl Harness {
    /// Creates a harness whose chain holds `policies`.
    pub fn new(policies: Vec<PolicyConfig>) -> Self {
        Self::with_config(EngineConfig::default(), policies)
    }

    /// Creates a harness with a custom engine configuration.
    pub fn with_config(config: EngineConfig, policies: Vec<PolicyConfig>) -> Self {
        let kit = InMemoryKit::new();
        kit.directory.put_route(RouteConfig {
            id: ChannelFilterId::new("R1"),
            label: "default".to_string(),
            is_default: true,
            backends: Default::default(),
            chain: Some(ChainConfig {
                id: "CH1".into(),
                name: "Primary".to_string(),
            }),
        });
        kit.directory.put_policies("CH1".into(), policies);
        kit.directory
            .put_alert_group(AlertGroup::firing(ALERT_GROUP, Some(ChannelFilterId::new("R1"))));
        let engine = Engine::new(
            config,
            kit.collaborators.clone(),
            Arc::new(BackendRegistry::with_defaults()),
        )
        .unwrap();
        Self { kit, engine }
    }

    /// Users notified so far, in order.
    pub fn notified(&self) -> Vec<String> {
        self.kit
            .dispatcher
            .notified_users()
            .iter()
            .map(|user| user.as_str().to_string())
            .collect()
    }

    /// Removes and returns every wake-up due at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Wakeup> {
        self.kit
            .queue
            .take_due(now)
            .into_iter()
            .map(|scheduled| scheduled.wakeup)
            .collect()
    }

    /// Current cursor of the stored snapshot.
    pub fn cursor(&self) -> Option<usize> {
        self.engine
            .current(&alert_group_id())
            .unwrap()
            .unwrap()
            .last_active_escalation_policy_order
    }
}

/// `NOTIFY_MULTIPLE_USERS` row.
pub fn notify(id: &str, order: u32, users: &[&str]) -> PolicyConfig {
    PolicyConfig::new(id, order, StepKind::NotifyMultipleUsers).with_users(users.iter().copied())
}

/// `WAIT` row.
pub fn wait(id: &str, order: u32, secs: u64) -> PolicyConfig {
    PolicyConfig::new(id, order, StepKind::Wait).with_wait_delay_secs(secs)
}
