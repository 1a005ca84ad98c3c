//! Inspect command implementation.
//!
//! Reads a persisted escalation document and reports where the chain
//! stands and whether anything will wake it up again.

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pager_escalation::{
    AlertGroupId, AuditReport, BackendRegistry, Engine, EngineConfig, EscalationDocument,
    InMemoryKit, JsonFileStore, PolicyId, StepKind, UserId,
};
use serde::Serialize;

use crate::cli::InspectArgs;
use crate::error::CliError;
use crate::output::{OutputFormat, TableDisplay, format_time, truncate};

/// Inspect command executor.
pub struct InspectCommand;

impl InspectCommand {
    /// Create a new inspect command.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Execute the inspect command.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or nothing is stored
    /// for the alert group.
    pub fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &InspectArgs,
    ) -> Result<(), CliError> {
        let store = JsonFileStore::open(&args.store_dir)?;
        let alert_group_id = AlertGroupId::from(args.alert_group.as_str());
        let view = inspect(store, &alert_group_id, args.at.unwrap_or_else(Utc::now))?;
        format.write(writer, &view)?;
        Ok(())
    }
}

impl Default for InspectCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads and audits the escalation of `alert_group_id` from `store`.
///
/// # Errors
///
/// Returns `CliError::NotFound` if nothing is stored for the alert group.
pub fn inspect(
    store: JsonFileStore,
    alert_group_id: &AlertGroupId,
    now: DateTime<Utc>,
) -> Result<InspectView, CliError> {
    let mut collaborators = InMemoryKit::new().collaborators;
    collaborators.store = Arc::new(store);
    let engine = Engine::new(
        EngineConfig::default(),
        collaborators,
        Arc::new(BackendRegistry::with_defaults()),
    )?;

    let doc = engine
        .document(alert_group_id)?
        .ok_or_else(|| CliError::NotFound(alert_group_id.to_string()))?;
    let audit = engine.audit(alert_group_id, now)?;
    Ok(InspectView::new(&doc, audit))
}

/// One policy row of an inspected chain.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyRow {
    /// Position in the frozen chain.
    pub position: usize,
    /// Policy id.
    pub id: PolicyId,
    /// Step type.
    pub step: StepKind,
    /// The step already ran in the current pass.
    pub executed: bool,
    /// The cursor points at this step.
    pub current: bool,
    /// Gate evaluations or repeats counted for this step.
    pub escalation_counter: u32,
    /// Last user notified by a round-robin step.
    pub last_notified_user: Option<UserId>,
}

/// Result of inspecting an escalation.
#[derive(Debug, Clone, Serialize)]
pub struct InspectView {
    /// Health report.
    #[serde(flatten)]
    pub audit: AuditReport,
    /// Stop reason, if stopped.
    pub stop_reason: Option<String>,
    /// Route the chain was frozen from.
    pub route: Option<String>,
    /// Chain name.
    pub chain: Option<String>,
    /// When the document was last written.
    pub updated_at: DateTime<Utc>,
    /// Policy rows in execution order.
    pub policies: Vec<PolicyRow>,
}

impl InspectView {
    fn new(doc: &EscalationDocument, audit: AuditReport) -> Self {
        let snapshot = &doc.snapshot;
        let cursor = snapshot.last_active_escalation_policy_order;
        let policies = snapshot
            .policies()
            .iter()
            .enumerate()
            .map(|(position, policy)| PolicyRow {
                position,
                id: policy.id.clone(),
                step: policy.step.kind(),
                executed: cursor.is_some_and(|c| position <= c),
                current: cursor == Some(position),
                escalation_counter: policy.escalation_counter,
                last_notified_user: policy.last_notified_user.clone(),
            })
            .collect();
        Self {
            audit,
            stop_reason: doc.stop_reason.map(|reason| reason.to_string()),
            route: snapshot
                .channel_filter_snapshot
                .as_ref()
                .map(|route| route.label.clone()),
            chain: snapshot
                .escalation_chain_snapshot
                .as_ref()
                .map(|chain| chain.name.clone()),
            updated_at: doc.updated_at,
            policies,
        }
    }

    fn health(&self) -> &'static str {
        if self.audit.stalled {
            "STALLED"
        } else if self.audit.state.is_terminal() {
            "finished"
        } else {
            "ok"
        }
    }
}

impl TableDisplay for InspectView {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let audit = &self.audit;
        writeln!(writer, "Alert group:   {}", audit.alert_group_id)?;
        writeln!(writer, "State:         {}", audit.state)?;
        if let Some(reason) = &self.stop_reason {
            writeln!(writer, "Stop reason:   {reason}")?;
        }
        writeln!(writer, "Route:         {}", self.route.as_deref().unwrap_or("-"))?;
        writeln!(writer, "Chain:         {}", self.chain.as_deref().unwrap_or("-"))?;
        writeln!(writer, "Next step:     {}", format_time(audit.next_step_eta))?;
        writeln!(writer, "Updated:       {}", format_time(Some(self.updated_at)))?;
        writeln!(writer, "Health:        {}", self.health())?;
        if audit.claim_expired {
            writeln!(writer, "               execution claim expired")?;
        }
        if !audit.eta_valid {
            writeln!(writer, "               wake-up missed")?;
        }

        if self.policies.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "No escalation steps.")?;
            return Ok(());
        }

        writeln!(writer)?;
        writeln!(
            writer,
            "   {:>3}  {:<12}  {:<32}  {:>7}  LAST USER",
            "#", "POLICY", "STEP", "COUNTER"
        )?;
        writeln!(writer, "{}", "─".repeat(75))?;
        for row in &self.policies {
            let marker = if row.current {
                "→"
            } else if row.executed {
                "✓"
            } else {
                " "
            };
            writeln!(
                writer,
                "{marker}  {:>3}  {:<12}  {:<32}  {:>7}  {}",
                row.position,
                truncate(row.id.as_str(), 12),
                row.step.as_str(),
                row.escalation_counter,
                row.last_notified_user.as_ref().map_or("-", UserId::as_str)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;
    use crate::commands::simulate::Simulation;
    use crate::scenario::ScenarioConfig;
    use chrono::TimeZone;

    const SCENARIO: &str = r#"{
        "start": "2024-03-01T09:45:00Z",
        "until": "2024-03-01T09:50:00Z",
        "routes": [{"id": "R1", "label": "default", "chain": {"id": "CH1", "name": "Primary"}}],
        "chains": [{"id": "CH1", "policies": [
            {"id": "P1", "order": 0, "step": "NOTIFY_USERS_QUEUE", "users": ["U1", "U2"]},
            {"id": "P2", "order": 1, "step": "WAIT", "wait_delay_secs": 900},
            {"id": "P3", "order": 2, "step": "NOTIFY_MULTIPLE_USERS", "users": ["U3"]}
        ]}],
        "alert_groups": [{"id": "AG1", "channel_filter_id": "R1"}]
    }"#;

    fn persisted() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let scenario = ScenarioConfig::from_json(SCENARIO).unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        Simulation::new(&scenario, Some(store)).unwrap().run().unwrap();
        dir
    }

    fn view(dir: &tempfile::TempDir, hour: u32, minute: u32) -> InspectView {
        let store = JsonFileStore::open(dir.path()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap();
        inspect(store, &"AG1".into(), now).unwrap()
    }

    #[test]
    fn shows_cursor_and_queue_state() {
        let dir = persisted();
        let view = view(&dir, 9, 50);

        assert_eq!(view.audit.cursor, Some(1));
        assert_eq!(view.chain.as_deref(), Some("Primary"));
        assert!(!view.audit.stalled);
        assert_eq!(view.health(), "ok");

        let rows = &view.policies;
        assert_eq!(rows.len(), 3);
        assert!(rows[0].executed && !rows[0].current);
        assert_eq!(rows[0].last_notified_user, Some(UserId::from("U1")));
        assert!(rows[1].current);
        assert!(!rows[2].executed);
    }

    #[test]
    fn flags_missed_wakeup_as_stalled() {
        let dir = persisted();
        // Due at 10:00, tolerance five minutes.
        let view = view(&dir, 11, 0);
        assert!(view.audit.stalled);
        assert!(!view.audit.eta_valid);
        assert_eq!(view.health(), "STALLED");

        let text = OutputFormat::default().to_string(&view).unwrap();
        assert!(text.contains("wake-up missed"));
    }

    #[test]
    fn json_output_flattens_audit() {
        let dir = persisted();
        let view = view(&dir, 9, 50);
        let json = OutputFormat::new(Format::Json).to_string(&view).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["alert_group_id"], "AG1");
        assert_eq!(value["state"], "running");
        assert_eq!(value["policies"][1]["step"], "WAIT");
    }

    #[test]
    fn missing_alert_group_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        let err = inspect(store, &"AG9".into(), Utc::now()).unwrap_err();
        assert!(matches!(err, CliError::NotFound(id) if id == "AG9"));
    }

    #[test]
    fn execute_writes_table() {
        let dir = persisted();
        let args = InspectArgs {
            alert_group: "AG1".to_string(),
            store_dir: dir.path().to_path_buf(),
            at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 50, 0).unwrap()),
        };
        let mut out = Vec::new();
        InspectCommand::new()
            .execute(&mut out, &OutputFormat::default(), &args)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("State:         running"));
        assert!(text.contains("NOTIFY_USERS_QUEUE"));
    }
}
