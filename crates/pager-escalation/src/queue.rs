//! Delayed task queues.
//!
//! [`ManualQueue`] holds wake-ups until the caller drains them, which makes
//! it a virtual clock for simulations and tests. [`TokioDelayedQueue`] hands
//! wake-ups to [`run_wakeup_worker`], which sleeps until each one is due.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::collaborators::{DelayedTaskQueue, Wakeup};
use crate::engine::Engine;
use crate::error::{EscalationError, Result};

/// A wake-up and when it should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledWakeup {
    /// When to run.
    pub run_at: DateTime<Utc>,
    /// What to run.
    pub wakeup: Wakeup,
}

/// Queue drained explicitly by the caller.
#[derive(Debug, Default)]
pub struct ManualQueue {
    pending: Mutex<Vec<ScheduledWakeup>>,
}

impl ManualQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every wake-up due at `now`, earliest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledWakeup> {
        let mut pending = self.pending.lock();
        let (mut due, rest): (Vec<_>, Vec<_>) =
            pending.drain(..).partition(|scheduled| scheduled.run_at <= now);
        *pending = rest;
        due.sort_by_key(|scheduled| scheduled.run_at);
        due
    }

    /// Returns a copy of every pending wake-up.
    #[must_use]
    pub fn pending(&self) -> Vec<ScheduledWakeup> {
        self.pending.lock().clone()
    }

    /// Returns the earliest pending run time.
    #[must_use]
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.pending.lock().iter().map(|s| s.run_at).min()
    }

    /// Returns the number of pending wake-ups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl DelayedTaskQueue for ManualQueue {
    fn schedule(&self, wakeup: &Wakeup, run_at: DateTime<Utc>) -> Result<()> {
        self.pending.lock().push(ScheduledWakeup {
            run_at,
            wakeup: wakeup.clone(),
        });
        Ok(())
    }
}

/// Receiving end of a [`TokioDelayedQueue`].
pub type WakeupReceiver = mpsc::UnboundedReceiver<ScheduledWakeup>;

/// Queue backed by tokio timers.
#[derive(Debug, Clone)]
pub struct TokioDelayedQueue {
    tx: mpsc::UnboundedSender<ScheduledWakeup>,
}

impl TokioDelayedQueue {
    /// Creates a queue and the receiver to pass to [`run_wakeup_worker`].
    #[must_use]
    pub fn new() -> (Self, WakeupReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DelayedTaskQueue for TokioDelayedQueue {
    fn schedule(&self, wakeup: &Wakeup, run_at: DateTime<Utc>) -> Result<()> {
        self.tx
            .send(ScheduledWakeup {
                run_at,
                wakeup: wakeup.clone(),
            })
            .map_err(|_| EscalationError::Queue("wake-up worker has shut down".to_string()))
    }
}

/// Runs wake-ups against `engine` as they come due.
///
/// Each wake-up gets its own task. The time passed to the engine is never
/// earlier than the scheduled time, so timer and wall clock drift cannot make
/// a wake-up look early. Returns once every sender is dropped and all
/// in-flight wake-ups have finished.
pub async fn run_wakeup_worker(engine: Arc<Engine>, mut rx: WakeupReceiver) {
    info!("wake-up worker started");
    let mut tasks = JoinSet::new();

    while let Some(scheduled) = rx.recv().await {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move {
            let delay = (scheduled.run_at - Utc::now())
                .to_std()
                .unwrap_or_default();
            tokio::time::sleep(delay).await;

            let now = Utc::now().max(scheduled.run_at);
            match engine.handle_wakeup(&scheduled.wakeup, now) {
                Ok(outcome) => debug!(
                    alert_group_id = %scheduled.wakeup.alert_group_id,
                    outcome = ?outcome,
                    "wake-up handled"
                ),
                Err(err) => warn!(
                    alert_group_id = %scheduled.wakeup.alert_group_id,
                    error = %err,
                    "wake-up failed"
                ),
            }
        });
        while tasks.try_join_next().is_some() {}
    }

    while tasks.join_next().await.is_some() {}
    info!("wake-up worker stopped");
}
