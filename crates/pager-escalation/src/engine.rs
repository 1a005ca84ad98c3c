//! Escalation engine.
//!
//! The [`Engine`] owns the lifecycle of one escalation per alert group. Each
//! alert group has a single persisted [`EscalationDocument`] holding the
//! snapshot, the lifecycle state and the token of the one wake-up that is
//! allowed to act on it.
//!
//! Every execution follows the same protocol:
//!
//! 1. load the document and check the token, the state and the alert group
//! 2. claim it with a compare-and-swap save that clears the token
//! 3. run the executor against the in-memory snapshot
//! 4. save the result with a fresh token, then schedule that token
//!
//! A duplicate or late wake-up therefore either fails the token check or
//! loses the claim race, and never executes a step twice.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::SnapshotBuilder;
use crate::collaborators::{Collaborators, Wakeup};
use crate::config::EngineConfig;
use crate::error::{EscalationError, Result};
use crate::executor::{ExecutionReport, RunOutcome, StepExecutor};
use crate::registry::BackendRegistry;
use crate::snapshot::EscalationSnapshot;
use crate::types::{AlertGroup, AlertGroupId};

/// Attempts made by lifecycle updates before giving up on write conflicts.
const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Why an escalation stopped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The alert group was resolved.
    Resolved,
    /// The alert group was acknowledged.
    Acknowledged,
    /// The alert group was silenced.
    Silenced,
    /// The alert group was attached to another one.
    Attached,
    /// A `RESOLVE` step resolved the alert group.
    ResolvedByEscalation,
    /// The alert group no longer exists.
    ConfigurationGone,
    /// Nobody was on call and the engine is configured to stop.
    NobodyOnCall,
}

impl StopReason {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Acknowledged => "acknowledged",
            Self::Silenced => "silenced",
            Self::Attached => "attached",
            Self::ResolvedByEscalation => "resolved_by_escalation",
            Self::ConfigurationGone => "configuration_gone",
            Self::NobodyOnCall => "nobody_on_call",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of an escalation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    /// Built but never executed.
    #[default]
    NotStarted,
    /// Executing, waiting or held at a gate.
    Running,
    /// Paused by maintenance.
    Paused,
    /// Every step has run.
    Exhausted,
    /// Stopped for good.
    Stopped,
}

impl EscalationState {
    /// Returns true if this state can transition to `target`.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        matches!(
            (self, target),
            (Self::NotStarted, Self::Running | Self::Paused | Self::Stopped)
                | (
                    Self::Running,
                    Self::Running | Self::Paused | Self::Exhausted | Self::Stopped
                )
                | (Self::Paused, Self::Running | Self::Stopped)
        )
    }

    /// Returns true for states no execution can leave.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Exhausted | Self::Stopped)
    }

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Exhausted => "exhausted",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EscalationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The persisted escalation of one alert group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDocument {
    /// Frozen chain plus runtime state.
    pub snapshot: EscalationSnapshot,
    /// Lifecycle state.
    pub state: EscalationState,
    /// Why the escalation stopped.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    /// Token of the only wake-up allowed to execute.
    #[serde(default)]
    pub wakeup_token: Option<Uuid>,
    /// Set while an execution holds the document.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

impl EscalationDocument {
    /// Wraps a freshly built snapshot.
    #[must_use]
    pub const fn new(snapshot: EscalationSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            snapshot,
            state: EscalationState::NotStarted,
            stop_reason: None,
            wakeup_token: None,
            claimed_at: None,
            updated_at: now,
        }
    }

    /// Moves to `target`, staying put if already there.
    ///
    /// # Errors
    ///
    /// Returns `EscalationError::InvalidTransition` if the move is not allowed.
    pub fn transition(&mut self, target: EscalationState) -> Result<()> {
        if self.state == target {
            return Ok(());
        }
        if !self.state.can_transition_to(&target) {
            return Err(EscalationError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        Ok(())
    }

    /// Returns true if an execution claimed the document less than `lease` ago.
    #[must_use]
    pub fn is_claimed(&self, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        self.claimed_at
            .is_some_and(|at| at.checked_add_signed(lease).is_none_or(|expiry| expiry > now))
    }

    fn stop(&mut self, reason: StopReason, now: DateTime<Utc>) {
        self.state = EscalationState::Stopped;
        self.stop_reason = Some(reason);
        self.wakeup_token = None;
        self.claimed_at = None;
        self.updated_at = now;
    }
}

/// Why an invocation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// There is no escalation document.
    NoDocument,
    /// The wake-up token was superseded.
    TokenMismatch,
    /// Another execution holds the document.
    Claimed,
    /// The wake-up arrived too long after `next_step_eta`.
    EtaExpired,
}

/// What an engine invocation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Invocation {
    /// Steps were executed.
    Executed {
        /// What the executor did.
        report: ExecutionReport,
    },
    /// The invocation was dropped without side effects.
    Stale {
        /// Why.
        reason: StaleReason,
    },
    /// A wake-up was put back on the queue.
    Requeued {
        /// When it will run.
        run_at: DateTime<Utc>,
    },
    /// The escalation is paused.
    Paused,
    /// Nothing was due.
    Idle,
    /// The escalation has ended.
    Finished {
        /// Final state.
        state: EscalationState,
        /// Stop reason, if stopped.
        stop_reason: Option<StopReason>,
    },
}

/// Health of a stored escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Alert group audited.
    pub alert_group_id: AlertGroupId,
    /// Lifecycle state.
    pub state: EscalationState,
    /// Cursor position.
    pub cursor: Option<usize>,
    /// Steps in the frozen chain.
    pub total_steps: usize,
    /// Next step due time.
    pub next_step_eta: Option<DateTime<Utc>>,
    /// `next_step_eta` is within tolerance.
    pub eta_valid: bool,
    /// An execution claim outlived its lease.
    pub claim_expired: bool,
    /// The escalation should be running but nothing will wake it.
    pub stalled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Manual,
    Wakeup(Uuid),
    Resume,
    NewAlert,
}

#[derive(Debug)]
struct Loaded {
    doc: EscalationDocument,
    revision: u64,
}

/// Drives escalations for every alert group.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    collaborators: Collaborators,
    registry: Arc<BackendRegistry>,
}

impl Engine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns `EscalationError::InvalidConfig` if the configuration is invalid.
    pub fn new(
        config: EngineConfig,
        collaborators: Collaborators,
        registry: Arc<BackendRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            warn!("no notification backends registered, route backend settings will be dropped");
        }
        debug!(backends = registry.len(), "escalation engine ready");
        Ok(Self {
            config,
            collaborators,
            registry,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Builds a snapshot for an alert group from live configuration.
    #[must_use]
    pub fn build(&self, alert_group: &AlertGroup) -> EscalationSnapshot {
        SnapshotBuilder::new(self.collaborators.chains.as_ref(), &self.registry).build(alert_group)
    }

    /// Returns the stored document of an alert group.
    pub fn document(&self, alert_group_id: &AlertGroupId) -> Result<Option<EscalationDocument>> {
        Ok(self.load(alert_group_id)?.map(|loaded| loaded.doc))
    }

    /// Returns the stored snapshot of an alert group.
    pub fn current(&self, alert_group_id: &AlertGroupId) -> Result<Option<EscalationSnapshot>> {
        Ok(self.load(alert_group_id)?.map(|loaded| loaded.doc.snapshot))
    }

    /// Starts the escalation, or runs its next step right now if it is
    /// already running. Builds the snapshot on first use.
    pub fn trigger(&self, alert_group_id: &AlertGroupId, now: DateTime<Utc>) -> Result<Invocation> {
        self.run(alert_group_id, now, Trigger::Manual)
    }

    /// Handles a wake-up delivered by the delayed task queue.
    pub fn handle_wakeup(&self, wakeup: &Wakeup, now: DateTime<Utc>) -> Result<Invocation> {
        self.run(&wakeup.alert_group_id, now, Trigger::Wakeup(wakeup.token))
    }

    /// Re-evaluates an alert-count gate the escalation is held at.
    pub fn on_new_alert(&self, alert_group_id: &AlertGroupId, now: DateTime<Utc>) -> Result<Invocation> {
        self.run(alert_group_id, now, Trigger::NewAlert)
    }

    /// Pauses the escalation. Pending wake-ups re-check and re-queue.
    pub fn pause(&self, alert_group_id: &AlertGroupId, now: DateTime<Utc>) -> Result<EscalationState> {
        let doc = self.update(alert_group_id, |doc| {
            doc.transition(EscalationState::Paused)?;
            doc.snapshot.pause_escalation = true;
            doc.updated_at = now;
            Ok(())
        })?;
        info!(alert_group_id = %alert_group_id, "escalation paused");
        Ok(doc.state)
    }

    /// Resumes a paused escalation, executing immediately if a step is due.
    pub fn resume(&self, alert_group_id: &AlertGroupId, now: DateTime<Utc>) -> Result<Invocation> {
        let doc = self.update(alert_group_id, |doc| {
            doc.transition(EscalationState::Running)?;
            doc.snapshot.pause_escalation = false;
            doc.updated_at = now;
            Ok(())
        })?;
        info!(alert_group_id = %alert_group_id, "escalation resumed");

        if doc.snapshot.step_is_due(now) && !held_at_gate(&doc.snapshot) {
            self.run(alert_group_id, now, Trigger::Resume)
        } else {
            Ok(Invocation::Idle)
        }
    }

    /// Stops the escalation for good. Wins over any in-flight execution.
    pub fn stop(
        &self,
        alert_group_id: &AlertGroupId,
        reason: StopReason,
        now: DateTime<Utc>,
    ) -> Result<EscalationState> {
        let doc = self.update(alert_group_id, |doc| {
            if !doc.state.is_terminal() {
                doc.stop(reason, now);
            }
            Ok(())
        })?;
        info!(alert_group_id = %alert_group_id, reason = %reason, state = %doc.state, "escalation stopped");
        Ok(doc.state)
    }

    /// Discards the stored escalation, rebuilds it from live configuration
    /// and starts it again.
    pub fn rebuild(&self, alert_group_id: &AlertGroupId, now: DateTime<Utc>) -> Result<Invocation> {
        let alert_group = self
            .collaborators
            .alert_groups
            .alert_group(alert_group_id)
            .ok_or_else(|| EscalationError::NotFound {
                id: alert_group_id.to_string(),
            })?;
        let revision = self
            .collaborators
            .store
            .load(alert_group_id)?
            .map(|stored| stored.revision);
        let doc = EscalationDocument::new(self.build(&alert_group), now);
        self.save(alert_group_id, &doc, revision)?;
        info!(alert_group_id = %alert_group_id, "escalation rebuilt");
        self.run(alert_group_id, now, Trigger::Manual)
    }

    /// Reports whether a stored escalation is healthy.
    pub fn audit(&self, alert_group_id: &AlertGroupId, now: DateTime<Utc>) -> Result<AuditReport> {
        let Loaded { doc, .. } = self.load_existing(alert_group_id)?;
        let eta_valid = doc.snapshot.next_step_eta_is_valid(now);
        let claim_expired =
            doc.claimed_at.is_some() && !doc.is_claimed(now, self.config.execution_lease());
        let live = doc.state == EscalationState::Running && !doc.snapshot.is_exhausted();
        let stalled = live && (!eta_valid || claim_expired);
        if stalled {
            warn!(
                alert_group_id = %alert_group_id,
                next_step_eta = ?doc.snapshot.next_step_eta,
                claim_expired,
                "escalation is stalled"
            );
        }
        Ok(AuditReport {
            alert_group_id: alert_group_id.clone(),
            state: doc.state,
            cursor: doc.snapshot.last_active_escalation_policy_order,
            total_steps: doc.snapshot.policies().len(),
            next_step_eta: doc.snapshot.next_step_eta,
            eta_valid,
            claim_expired,
            stalled,
        })
    }

    /// Schedules a fresh wake-up for a stalled escalation.
    ///
    /// Returns `None` if the escalation is healthy.
    pub fn reschedule_stalled(
        &self,
        alert_group_id: &AlertGroupId,
        now: DateTime<Utc>,
    ) -> Result<Option<Wakeup>> {
        if !self.audit(alert_group_id, now)?.stalled {
            return Ok(None);
        }
        let wakeup = Wakeup::mint(alert_group_id.clone());
        self.update(alert_group_id, |doc| {
            doc.wakeup_token = Some(wakeup.token);
            doc.claimed_at = None;
            doc.snapshot.next_step_eta = Some(now);
            doc.updated_at = now;
            Ok(())
        })?;
        self.collaborators.queue.schedule(&wakeup, now)?;
        info!(alert_group_id = %alert_group_id, "rescheduled stalled escalation");
        Ok(Some(wakeup))
    }

    fn run(&self, alert_group_id: &AlertGroupId, now: DateTime<Utc>, trigger: Trigger) -> Result<Invocation> {
        let alert_group = self.collaborators.alert_groups.alert_group(alert_group_id);

        let loaded = match (trigger, &alert_group) {
            (Trigger::Manual, Some(alert_group)) => Some(self.load_or_create(alert_group, now)?),
            _ => self.load(alert_group_id)?,
        };
        let Some(Loaded { mut doc, revision }) = loaded else {
            debug!(alert_group_id = %alert_group_id, "no escalation document");
            return Ok(Invocation::Stale {
                reason: StaleReason::NoDocument,
            });
        };

        if doc.state.is_terminal() {
            return Ok(finished(&doc));
        }
        if let Trigger::Wakeup(token) = trigger {
            if doc.wakeup_token != Some(token) {
                debug!(alert_group_id = %alert_group_id, "stale wake-up token");
                return Ok(Invocation::Stale {
                    reason: StaleReason::TokenMismatch,
                });
            }
        }
        if doc.is_claimed(now, self.config.execution_lease()) {
            debug!(alert_group_id = %alert_group_id, "escalation claimed by another execution");
            return Ok(Invocation::Stale {
                reason: StaleReason::Claimed,
            });
        }

        let Some(alert_group) = alert_group else {
            return self.finish(alert_group_id, doc, revision, StopReason::ConfigurationGone, now);
        };
        if let Some(reason) = alert_group.status.stop_reason() {
            return self.finish(alert_group_id, doc, revision, reason, now);
        }

        if doc.snapshot.pause_escalation {
            return match trigger {
                Trigger::Wakeup(_) => self.requeue_paused(alert_group_id, doc, revision, now),
                _ => Ok(Invocation::Paused),
            };
        }

        match trigger {
            Trigger::Wakeup(token) => {
                if !doc.snapshot.next_step_eta_is_valid(now) {
                    warn!(
                        alert_group_id = %alert_group_id,
                        next_step_eta = ?doc.snapshot.next_step_eta,
                        "wake-up arrived too late, dropping"
                    );
                    return Ok(Invocation::Stale {
                        reason: StaleReason::EtaExpired,
                    });
                }
                if let Some(eta) = doc.snapshot.next_step_eta.filter(|eta| *eta > now) {
                    debug!(alert_group_id = %alert_group_id, eta = %eta, "early wake-up, re-queueing");
                    let wakeup = Wakeup {
                        alert_group_id: alert_group_id.clone(),
                        token,
                    };
                    self.collaborators.queue.schedule(&wakeup, eta)?;
                    return Ok(Invocation::Requeued { run_at: eta });
                }
            }
            Trigger::NewAlert if !held_at_gate(&doc.snapshot) => return Ok(Invocation::Idle),
            _ => {}
        }

        self.execute(alert_group_id, &alert_group, doc, revision, now)
    }

    fn execute(
        &self,
        alert_group_id: &AlertGroupId,
        alert_group: &AlertGroup,
        mut doc: EscalationDocument,
        revision: u64,
        now: DateTime<Utc>,
    ) -> Result<Invocation> {
        doc.transition(EscalationState::Running)?;
        doc.claimed_at = Some(now);
        doc.wakeup_token = None;
        let claimed = match self.save(alert_group_id, &doc, Some(revision)) {
            Ok(claimed) => claimed,
            Err(EscalationError::WriteConflict { .. }) => {
                debug!(alert_group_id = %alert_group_id, "lost claim race");
                return Ok(Invocation::Stale {
                    reason: StaleReason::Claimed,
                });
            }
            Err(err) => return Err(err),
        };

        let report = StepExecutor::new(&self.collaborators, &self.config).execute_actual_step(
            &mut doc.snapshot,
            alert_group,
            now,
        );

        doc.claimed_at = None;
        doc.updated_at = now;
        let mut wakeup = None;
        match &report.outcome {
            RunOutcome::Waiting { eta } => {
                let next = Wakeup::mint(alert_group_id.clone());
                doc.wakeup_token = Some(next.token);
                wakeup = Some((next, *eta));
            }
            RunOutcome::Exhausted => doc.transition(EscalationState::Exhausted)?,
            RunOutcome::Stopped { reason } => doc.stop(*reason, now),
            RunOutcome::Held | RunOutcome::Paused => {}
        }
        let Some(doc) = self.commit(alert_group_id, doc, claimed, now)? else {
            return Ok(Invocation::Executed { report });
        };

        if let Some((wakeup, eta)) = wakeup.filter(|(next, _)| doc.wakeup_token == Some(next.token)) {
            self.collaborators.queue.schedule(&wakeup, eta)?;
        }
        Ok(Invocation::Executed { report })
    }

    /// Writes the result of an execution that claimed the document at `now`.
    ///
    /// Lifecycle changes saved while the claim was held are merged in: a stop
    /// keeps its state and reason, a pause keeps the escalation paused. The
    /// run's snapshot is kept either way, so nothing it dispatched runs
    /// again. Returns `None` if a rebuild or an expired lease superseded the
    /// claim.
    fn commit(
        &self,
        alert_group_id: &AlertGroupId,
        mut doc: EscalationDocument,
        mut revision: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<EscalationDocument>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.save(alert_group_id, &doc, Some(revision)) {
                Ok(_) => return Ok(Some(doc)),
                Err(EscalationError::WriteConflict { .. }) if attempt < MAX_UPDATE_ATTEMPTS => {}
                Err(err) => return Err(err),
            }

            let Loaded {
                doc: latest,
                revision: latest_revision,
            } = self.load_existing(alert_group_id)?;
            revision = latest_revision;

            if latest.state.is_terminal() {
                debug!(alert_group_id = %alert_group_id, state = %latest.state, "escalation ended during execution");
                let snapshot = doc.snapshot;
                doc = latest;
                doc.snapshot = snapshot;
                doc.wakeup_token = None;
                doc.claimed_at = None;
                doc.updated_at = now;
            } else if latest.claimed_at == Some(now) {
                if latest.snapshot.pause_escalation && !doc.state.is_terminal() {
                    debug!(alert_group_id = %alert_group_id, "escalation paused during execution");
                    doc.transition(EscalationState::Paused)?;
                    doc.snapshot.pause_escalation = true;
                }
            } else {
                warn!(alert_group_id = %alert_group_id, "execution superseded, discarding its result");
                return Ok(None);
            }
        }
    }

    fn requeue_paused(
        &self,
        alert_group_id: &AlertGroupId,
        mut doc: EscalationDocument,
        revision: u64,
        now: DateTime<Utc>,
    ) -> Result<Invocation> {
        let run_at = now
            .checked_add_signed(self.config.paused_recheck_interval())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let wakeup = Wakeup::mint(alert_group_id.clone());
        doc.wakeup_token = Some(wakeup.token);
        match self.save(alert_group_id, &doc, Some(revision)) {
            Ok(_) => {}
            Err(EscalationError::WriteConflict { .. }) => {
                return Ok(Invocation::Stale {
                    reason: StaleReason::Claimed,
                });
            }
            Err(err) => return Err(err),
        }
        self.collaborators.queue.schedule(&wakeup, run_at)?;
        debug!(alert_group_id = %alert_group_id, run_at = %run_at, "escalation paused, re-queued");
        Ok(Invocation::Requeued { run_at })
    }

    fn finish(
        &self,
        alert_group_id: &AlertGroupId,
        mut doc: EscalationDocument,
        revision: u64,
        reason: StopReason,
        now: DateTime<Utc>,
    ) -> Result<Invocation> {
        doc.stop(reason, now);
        match self.save(alert_group_id, &doc, Some(revision)) {
            Ok(_) => {
                info!(alert_group_id = %alert_group_id, reason = %reason, "escalation stopped");
                Ok(finished(&doc))
            }
            Err(EscalationError::WriteConflict { .. }) => Ok(Invocation::Stale {
                reason: StaleReason::Claimed,
            }),
            Err(err) => Err(err),
        }
    }

    /// Applies `mutate` to the stored document, retrying on write conflicts.
    fn update<F>(&self, alert_group_id: &AlertGroupId, mut mutate: F) -> Result<EscalationDocument>
    where
        F: FnMut(&mut EscalationDocument) -> Result<()>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Loaded { mut doc, revision } = self.load_existing(alert_group_id)?;
            mutate(&mut doc)?;
            match self.save(alert_group_id, &doc, Some(revision)) {
                Ok(_) => return Ok(doc),
                Err(EscalationError::WriteConflict { .. }) if attempt < MAX_UPDATE_ATTEMPTS => {
                    debug!(alert_group_id = %alert_group_id, attempt, "write conflict, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn load_or_create(&self, alert_group: &AlertGroup, now: DateTime<Utc>) -> Result<Loaded> {
        if let Some(loaded) = self.load(&alert_group.id)? {
            return Ok(loaded);
        }
        let doc = EscalationDocument::new(self.build(alert_group), now);
        match self.save(&alert_group.id, &doc, None) {
            Ok(revision) => {
                info!(
                    alert_group_id = %alert_group.id,
                    steps = doc.snapshot.policies().len(),
                    "escalation snapshot created"
                );
                Ok(Loaded { doc, revision })
            }
            Err(EscalationError::WriteConflict { .. }) => self.load_existing(&alert_group.id),
            Err(err) => Err(err),
        }
    }

    fn load_existing(&self, alert_group_id: &AlertGroupId) -> Result<Loaded> {
        self.load(alert_group_id)?
            .ok_or_else(|| EscalationError::NotFound {
                id: alert_group_id.to_string(),
            })
    }

    fn load(&self, alert_group_id: &AlertGroupId) -> Result<Option<Loaded>> {
        let Some(stored) = self.collaborators.store.load(alert_group_id)? else {
            return Ok(None);
        };
        let doc: EscalationDocument = serde_json::from_str(&stored.blob)?;
        doc.snapshot.validate()?;
        Ok(Some(Loaded {
            doc,
            revision: stored.revision,
        }))
    }

    fn save(
        &self,
        alert_group_id: &AlertGroupId,
        doc: &EscalationDocument,
        expected_revision: Option<u64>,
    ) -> Result<u64> {
        let blob = serde_json::to_string(doc)?;
        self.collaborators
            .store
            .save(alert_group_id, &blob, expected_revision)
    }
}

fn held_at_gate(snapshot: &EscalationSnapshot) -> bool {
    snapshot
        .next_active_policy()
        .is_some_and(|policy| policy.pause_escalation)
}

const fn finished(doc: &EscalationDocument) -> Invocation {
    Invocation::Finished {
        state: doc.state,
        stop_reason: doc.stop_reason,
    }
}
