//! Scenario files for the simulator.
//!
//! A scenario describes routes, chains, schedules, groups and alert groups,
//! plus timed events (acknowledgements, new alerts, maintenance windows) to
//! replay against the engine on a virtual clock.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use pager_escalation::{
    AlertGroup, AlertGroupId, ChainId, EngineConfig, GroupId, PolicyConfig, RouteConfig,
    ScheduleId, StaticDirectory, UserId,
};
use serde::{Deserialize, Serialize};

use crate::error::CliError;

/// How long a simulation runs when the scenario sets no end.
pub const DEFAULT_HORIZON_DAYS: i64 = 7;

/// An escalation chain and its policy rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDefinition {
    /// Chain id, referenced by routes.
    pub id: ChainId,
    /// Policy rows in any order.
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

/// Something that happens to an alert group during the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// Start or advance escalation immediately.
    Trigger,
    /// A user acknowledges the alert group.
    Acknowledge,
    /// The alert group is resolved.
    Resolve,
    /// The alert group is silenced.
    Silence,
    /// A new alert arrives in the alert group.
    Alert,
    /// Maintenance starts.
    Pause,
    /// Maintenance ends.
    Resume,
    /// Discard the snapshot and rebuild from current configuration.
    Rebuild,
    /// The alert group's route is deleted.
    DeleteRoute,
}

impl ScenarioAction {
    /// Returns the action name as written in scenario files.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Acknowledge => "acknowledge",
            Self::Resolve => "resolve",
            Self::Silence => "silence",
            Self::Alert => "alert",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Rebuild => "rebuild",
            Self::DeleteRoute => "delete_route",
        }
    }
}

/// A timed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioEvent {
    /// When it happens.
    pub at: DateTime<Utc>,
    /// Alert group it applies to.
    pub alert_group: AlertGroupId,
    /// What happens.
    #[serde(flatten)]
    pub action: ScenarioAction,
}

/// A complete simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Virtual clock start; every alert group is triggered at this time.
    pub start: DateTime<Utc>,
    /// Virtual clock end.
    pub until: Option<DateTime<Utc>>,
    /// Engine configuration.
    pub engine: EngineConfig,
    /// Routes.
    pub routes: Vec<RouteConfig>,
    /// Chains.
    pub chains: Vec<ChainDefinition>,
    /// Who is on call per schedule.
    pub schedules: BTreeMap<ScheduleId, Vec<UserId>>,
    /// Members per group.
    pub groups: BTreeMap<GroupId, Vec<UserId>>,
    /// Alert groups firing at `start`.
    pub alert_groups: Vec<AlertGroup>,
    /// Timed events.
    pub events: Vec<ScenarioEvent>,
    /// Users whose notifications fail.
    pub failing_users: Vec<UserId>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            start: DateTime::<Utc>::UNIX_EPOCH,
            until: None,
            engine: EngineConfig::default(),
            routes: Vec::new(),
            chains: Vec::new(),
            schedules: BTreeMap::new(),
            groups: BTreeMap::new(),
            alert_groups: Vec::new(),
            events: Vec::new(),
            failing_users: Vec::new(),
        }
    }
}

impl ScenarioConfig {
    /// Loads a scenario from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parses and validates a scenario.
    ///
    /// # Errors
    ///
    /// Returns `CliError::Scenario` if the JSON is invalid or inconsistent.
    pub fn from_json(json: &str) -> Result<Self, CliError> {
        let scenario: Self = serde_json::from_str(json)
            .map_err(|e| CliError::Scenario(format!("invalid scenario: {e}")))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Checks cross references and the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns `CliError::Scenario` describing the first problem found.
    pub fn validate(&self) -> Result<(), CliError> {
        self.engine
            .validate()
            .map_err(|e| CliError::Scenario(e.to_string()))?;

        if self.alert_groups.is_empty() {
            return Err(CliError::Scenario("no alert groups defined".to_string()));
        }
        for route in &self.routes {
            if let Some(chain) = &route.chain {
                if !self.chains.iter().any(|c| c.id == chain.id) {
                    return Err(CliError::Scenario(format!(
                        "route {} references unknown chain {}",
                        route.id, chain.id
                    )));
                }
            }
        }
        for event in &self.events {
            if !self.alert_groups.iter().any(|ag| ag.id == event.alert_group) {
                return Err(CliError::Scenario(format!(
                    "event at {} references unknown alert group {}",
                    event.at, event.alert_group
                )));
            }
            if event.at < self.start {
                return Err(CliError::Scenario(format!(
                    "event at {} happens before the start",
                    event.at
                )));
            }
        }
        Ok(())
    }

    /// Returns the end of the virtual clock.
    #[must_use]
    pub fn horizon(&self) -> DateTime<Utc> {
        self.until
            .unwrap_or_else(|| self.start + Duration::days(DEFAULT_HORIZON_DAYS))
    }

    /// Returns the events ordered by time, stable for equal times.
    #[must_use]
    pub fn timeline(&self) -> Vec<ScenarioEvent> {
        let mut events = self.events.clone();
        events.sort_by_key(|event| event.at);
        events
    }

    /// Loads the static configuration into `directory`.
    pub fn populate(&self, directory: &StaticDirectory) {
        for route in &self.routes {
            directory.put_route(route.clone());
        }
        for chain in &self.chains {
            directory.put_policies(chain.id.clone(), chain.policies.clone());
        }
        for (id, on_call) in &self.schedules {
            directory.put_schedule(id.clone(), on_call.clone());
        }
        for (id, members) in &self.groups {
            directory.put_group(id.clone(), members.clone());
        }
        for alert_group in &self.alert_groups {
            directory.put_alert_group(alert_group.clone());
            directory.push_alert(&alert_group.id, self.start);
        }
    }
}
