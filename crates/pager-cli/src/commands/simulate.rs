//! Scenario simulation.
//!
//! Replays a scenario against in-memory collaborators. Wake-ups land in a
//! [`ManualQueue`] and the virtual clock jumps straight to the next wake-up
//! or event, so days of escalation replay instantly.

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pager_escalation::{
    AlertGroupId, AlertGroupSource, AlertGroupStatus, BackendRegistry, Engine, InMemoryKit,
    Invocation, JsonFileStore, RunOutcome, StopReason, UserId,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::SimulateArgs;
use crate::error::CliError;
use crate::output::{OutputFormat, TableDisplay, format_time, truncate};
use crate::scenario::{ScenarioAction, ScenarioConfig, ScenarioEvent};

/// Upper bound on clock ticks, guarding against chains that never settle.
const MAX_TICKS: usize = 10_000;

/// Handler for the simulate command.
pub struct SimulateCommand;

impl SimulateCommand {
    /// Creates a new simulate command handler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Loads the scenario, runs it and writes the report.
    ///
    /// # Errors
    ///
    /// Returns error if the scenario is invalid or the engine fails.
    pub fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &SimulateArgs,
    ) -> Result<(), CliError> {
        let mut scenario = ScenarioConfig::load(&args.scenario)?;
        if let Some(until) = args.until {
            scenario.until = Some(until);
        }
        let store = args
            .store_dir
            .as_ref()
            .map(JsonFileStore::open)
            .transpose()?;
        let report = Simulation::new(&scenario, store)?.run()?;
        format.write(out, &report)?;
        Ok(())
    }
}

impl Default for SimulateCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// A scenario wired to an engine.
pub struct Simulation<'a> {
    scenario: &'a ScenarioConfig,
    kit: InMemoryKit,
    engine: Engine,
}

impl<'a> Simulation<'a> {
    /// Wires the scenario to in-memory collaborators, optionally persisting
    /// documents to `store`.
    ///
    /// # Errors
    ///
    /// Returns error if the engine configuration is invalid.
    pub fn new(scenario: &'a ScenarioConfig, store: Option<JsonFileStore>) -> Result<Self, CliError> {
        let kit = InMemoryKit::new();
        scenario.populate(&kit.directory);
        for user in &scenario.failing_users {
            kit.dispatcher.fail_for(user.clone());
        }
        let mut collaborators = kit.collaborators.clone();
        if let Some(store) = store {
            collaborators.store = Arc::new(store);
        }
        let engine = Engine::new(
            scenario.engine.clone(),
            collaborators,
            Arc::new(BackendRegistry::with_defaults()),
        )?;
        Ok(Self {
            scenario,
            kit,
            engine,
        })
    }

    /// Runs the scenario to its horizon.
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails structurally.
    pub fn run(&self) -> Result<SimulationReport, CliError> {
        let start = self.scenario.start;
        let horizon = self.scenario.horizon();
        let mut entries = Vec::new();

        info!(start = %start, horizon = %horizon, "simulation started");
        for alert_group in &self.scenario.alert_groups {
            let invocation = self.engine.trigger(&alert_group.id, start)?;
            entries.push(TimelineEntry::new(start, &alert_group.id, "start", &invocation));
        }

        let mut events = self.scenario.timeline().into_iter().peekable();
        let mut now = start;
        let mut ticks = 0;
        loop {
            let next_event = events.peek().map(|event| event.at);
            let next = match (next_event, self.kit.queue.next_run_at()) {
                (Some(a), Some(b)) => a.min(b),
                (Some(a), None) | (None, Some(a)) => a,
                (None, None) => break,
            };
            if next > horizon || ticks >= MAX_TICKS {
                debug!(next = %next, ticks, "simulation horizon reached");
                break;
            }
            ticks += 1;
            now = now.max(next);

            while let Some(event) = events.next_if(|event| event.at <= now) {
                entries.push(self.apply(&event, now)?);
            }
            for scheduled in self.kit.queue.take_due(now) {
                let invocation = self.engine.handle_wakeup(&scheduled.wakeup, now)?;
                entries.push(TimelineEntry::new(
                    now,
                    &scheduled.wakeup.alert_group_id,
                    "wakeup",
                    &invocation,
                ));
            }
        }

        let escalations = self
            .scenario
            .alert_groups
            .iter()
            .map(|alert_group| self.summarize(&alert_group.id))
            .collect::<Result<Vec<_>, _>>()?;
        let notifications = self.kit.dispatcher.sent().len();
        info!(end = %now, notifications, "simulation finished");

        Ok(SimulationReport {
            start,
            end: now,
            notifications,
            pending_wakeups: self.kit.queue.len(),
            timeline: entries,
            escalations,
        })
    }

    fn apply(&self, event: &ScenarioEvent, now: DateTime<Utc>) -> Result<TimelineEntry, CliError> {
        let id = &event.alert_group;
        let directory = &self.kit.directory;
        let invocation = match event.action {
            ScenarioAction::Trigger => self.engine.trigger(id, now)?,
            ScenarioAction::Acknowledge => {
                self.stop(id, AlertGroupStatus::Acknowledged, StopReason::Acknowledged, now)?
            }
            ScenarioAction::Resolve => {
                self.stop(id, AlertGroupStatus::Resolved, StopReason::Resolved, now)?
            }
            ScenarioAction::Silence => {
                self.stop(id, AlertGroupStatus::Silenced, StopReason::Silenced, now)?
            }
            ScenarioAction::Alert => {
                directory.push_alert(id, now);
                self.engine.on_new_alert(id, now)?
            }
            ScenarioAction::Pause => {
                self.engine.pause(id, now)?;
                Invocation::Paused
            }
            ScenarioAction::Resume => self.engine.resume(id, now)?,
            ScenarioAction::Rebuild => self.engine.rebuild(id, now)?,
            ScenarioAction::DeleteRoute => {
                if let Some(route) = directory
                    .alert_group(id)
                    .and_then(|alert_group| alert_group.channel_filter_id)
                {
                    directory.remove_route(&route);
                }
                Invocation::Idle
            }
        };
        Ok(TimelineEntry::new(now, id, event.action.as_str(), &invocation))
    }

    fn stop(
        &self,
        id: &AlertGroupId,
        status: AlertGroupStatus,
        reason: StopReason,
        now: DateTime<Utc>,
    ) -> Result<Invocation, CliError> {
        self.kit.directory.set_status(id, status);
        let state = self.engine.stop(id, reason, now)?;
        let stop_reason = self.engine.document(id)?.and_then(|doc| doc.stop_reason);
        Ok(Invocation::Finished { state, stop_reason })
    }

    fn summarize(&self, id: &AlertGroupId) -> Result<EscalationSummary, CliError> {
        let doc = self
            .engine
            .document(id)?
            .ok_or_else(|| CliError::NotFound(id.to_string()))?;
        Ok(EscalationSummary {
            alert_group: id.clone(),
            state: doc.state.to_string(),
            stop_reason: doc.stop_reason.map(|reason| reason.to_string()),
            cursor: doc.snapshot.last_active_escalation_policy_order,
            total_steps: doc.snapshot.policies().len(),
            next_step_eta: doc.snapshot.next_step_eta,
        })
    }
}

/// One thing that happened during the simulation.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    /// Virtual time.
    pub at: DateTime<Utc>,
    /// Alert group affected.
    pub alert_group: AlertGroupId,
    /// What caused it.
    pub source: String,
    /// Short description of the engine's response.
    pub result: String,
    /// Users notified.
    pub notified: Vec<UserId>,
}

impl TimelineEntry {
    fn new(at: DateTime<Utc>, alert_group: &AlertGroupId, source: &str, invocation: &Invocation) -> Self {
        let (result, notified) = describe(invocation);
        Self {
            at,
            alert_group: alert_group.clone(),
            source: source.to_string(),
            result,
            notified,
        }
    }
}

fn describe(invocation: &Invocation) -> (String, Vec<UserId>) {
    match invocation {
        Invocation::Executed { report } => {
            let outcome = match &report.outcome {
                RunOutcome::Paused => "paused".to_string(),
                RunOutcome::Waiting { eta } => {
                    format!("waiting until {}", format_time(Some(*eta)))
                }
                RunOutcome::Held => "held at alert gate".to_string(),
                RunOutcome::Exhausted => "exhausted".to_string(),
                RunOutcome::Stopped { reason } => format!("stopped ({reason})"),
            };
            (
                format!("ran {} step(s), {outcome}", report.steps_executed),
                report.notified.clone(),
            )
        }
        Invocation::Stale { reason } => (format!("stale ({reason:?})"), Vec::new()),
        Invocation::Requeued { run_at } => {
            (format!("re-queued for {}", format_time(Some(*run_at))), Vec::new())
        }
        Invocation::Paused => ("paused".to_string(), Vec::new()),
        Invocation::Idle => ("nothing due".to_string(), Vec::new()),
        Invocation::Finished { state, stop_reason } => {
            let reason = stop_reason.map(|r| format!(" ({r})")).unwrap_or_default();
            (format!("{state}{reason}"), Vec::new())
        }
    }
}

/// Final state of one escalation.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationSummary {
    /// Alert group.
    pub alert_group: AlertGroupId,
    /// Lifecycle state.
    pub state: String,
    /// Stop reason, if stopped.
    pub stop_reason: Option<String>,
    /// Cursor position.
    pub cursor: Option<usize>,
    /// Steps in the frozen chain.
    pub total_steps: usize,
    /// Next step due time.
    pub next_step_eta: Option<DateTime<Utc>>,
}

/// Everything a simulation did.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Virtual clock start.
    pub start: DateTime<Utc>,
    /// Virtual clock at the end.
    pub end: DateTime<Utc>,
    /// Notifications delivered.
    pub notifications: usize,
    /// Wake-ups still queued past the horizon.
    pub pending_wakeups: usize,
    /// Timeline in order.
    pub timeline: Vec<TimelineEntry>,
    /// Final escalation states.
    pub escalations: Vec<EscalationSummary>,
}

impl TableDisplay for SimulationReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(
            writer,
            "{:<19}  {:<12}  {:<12}  {:<40}  NOTIFIED",
            "TIME", "ALERT GROUP", "SOURCE", "RESULT"
        )?;
        writeln!(writer, "{}", "─".repeat(100))?;
        for entry in &self.timeline {
            let notified: Vec<&str> = entry.notified.iter().map(UserId::as_str).collect();
            writeln!(
                writer,
                "{:<19}  {:<12}  {:<12}  {:<40}  {}",
                format_time(Some(entry.at)),
                truncate(entry.alert_group.as_str(), 12),
                entry.source,
                truncate(&entry.result, 40),
                notified.join(", ")
            )?;
        }

        writeln!(writer)?;
        writeln!(
            writer,
            "{:<12}  {:<10}  {:<24}  {:>8}  NEXT STEP",
            "ALERT GROUP", "STATE", "STOP REASON", "CURSOR"
        )?;
        writeln!(writer, "{}", "─".repeat(80))?;
        for summary in &self.escalations {
            let cursor = summary
                .cursor
                .map_or_else(|| "-".to_string(), |c| c.to_string());
            writeln!(
                writer,
                "{:<12}  {:<10}  {:<24}  {:>8}  {}",
                truncate(summary.alert_group.as_str(), 12),
                summary.state,
                summary.stop_reason.as_deref().unwrap_or("-"),
                format!("{cursor}/{}", summary.total_steps),
                format_time(summary.next_step_eta)
            )?;
        }

        writeln!(writer)?;
        writeln!(
            writer,
            "Simulated {} to {}: {} notification(s), {} wake-up(s) pending",
            format_time(Some(self.start)),
            format_time(Some(self.end)),
            self.notifications,
            self.pending_wakeups
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "start": "2024-03-01T09:45:00Z",
        "routes": [{"id": "R1", "label": "default", "chain": {"id": "CH1", "name": "Primary"}}],
        "chains": [{"id": "CH1", "policies": [
            {"id": "P1", "order": 0, "step": "NOTIFY_MULTIPLE_USERS", "users": ["U1", "U2"]},
            {"id": "P2", "order": 1, "step": "WAIT", "wait_delay_secs": 900},
            {"id": "P3", "order": 2, "step": "NOTIFY_IF_TIME", "from_time": "09:00:00", "to_time": "17:00:00"},
            {"id": "P4", "order": 3, "step": "NOTIFY_USERS_QUEUE", "users": ["U3"]}
        ]}],
        "alert_groups": [
            {"id": "AG1", "channel_filter_id": "R1"},
            {"id": "AG2", "channel_filter_id": "R1"}
        ],
        "events": [
            {"at": "2024-03-01T09:50:00Z", "alert_group": "AG2", "action": "acknowledge"}
        ]
    }"#;

    fn run(json: &str) -> SimulationReport {
        let scenario = ScenarioConfig::from_json(json).unwrap();
        Simulation::new(&scenario, None).unwrap().run().unwrap()
    }

    #[test]
    fn replays_scenario_to_completion() {
        let report = run(SCENARIO);

        let ag1 = &report.escalations[0];
        assert_eq!(ag1.state, "exhausted");
        assert_eq!(ag1.cursor, Some(3));

        let ag2 = &report.escalations[1];
        assert_eq!(ag2.state, "stopped");
        assert_eq!(ag2.stop_reason.as_deref(), Some("acknowledged"));

        // U1 and U2 for both groups at start, U3 for AG1 after the wait.
        assert_eq!(report.notifications, 5);
        assert_eq!(report.pending_wakeups, 0);
        assert_eq!(report.end.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn stale_wakeup_after_acknowledge_is_reported() {
        let report = run(SCENARIO);
        let ag2_wakeup = report
            .timeline
            .iter()
            .find(|entry| entry.alert_group.as_str() == "AG2" && entry.source == "wakeup")
            .unwrap();
        assert!(ag2_wakeup.notified.is_empty());
        assert!(ag2_wakeup.result.starts_with("stopped"));
    }

    #[test]
    fn horizon_cuts_simulation_short() {
        let json = SCENARIO.replace(
            r#""start": "2024-03-01T09:45:00Z","#,
            r#""start": "2024-03-01T09:45:00Z", "until": "2024-03-01T09:55:00Z","#,
        );
        let report = run(&json);
        assert_eq!(report.escalations[0].state, "running");
        // AG2 was acknowledged but its wake-up stays queued until delivery.
        assert_eq!(report.pending_wakeups, 2);
    }

    #[test]
    fn table_output_lists_timeline_and_summary() {
        let report = run(SCENARIO);
        let text = OutputFormat::default().to_string(&report).unwrap();
        assert!(text.contains("ALERT GROUP"));
        assert!(text.contains("acknowledge"));
        assert!(text.contains("5 notification(s)"));
    }

    #[test]
    fn persists_documents_when_store_given() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = ScenarioConfig::from_json(SCENARIO).unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        Simulation::new(&scenario, Some(store)).unwrap().run().unwrap();
        assert!(dir.path().join("AG1.json").exists());
        assert!(dir.path().join("AG2.json").exists());
    }

    #[test]
    fn bundled_demo_scenario_runs() {
        let report = run(include_str!("../../../../demos/scenario.json"));
        assert_eq!(report.escalations[1].stop_reason.as_deref(), Some("acknowledged"));
        assert!(report.notifications > 0);
        assert!(report.timeline.iter().any(|entry| entry.source == "pause"));
    }
}
