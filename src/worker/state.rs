//! Worker loop phases and the runtime state shared with background loops.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::model::CurrentJob;

/// Phase of the main loop for the job in hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    /// Waiting on the pending queues.
    Idle,
    /// Popped into a processing queue, not yet locked.
    Claimed,
    /// Lock record points at this worker.
    Locked,
    /// Handler is running.
    Dispatched,
    /// Result pushed and records cleaned up.
    Reported,
    /// Another worker owns the job now.
    LockLost,
    /// Error pushed and records cleaned up.
    Errored,
}

impl WorkerPhase {
    /// Check if this phase allows moving to `target`.
    pub fn can_transition_to(&self, target: WorkerPhase) -> bool {
        use WorkerPhase::*;

        matches!(
            (self, target),
            (Idle, Claimed) |
            (Claimed, Locked) |
            // Unusable payloads are reported before the lock is taken
            (Claimed, Errored) |
            (Locked, Dispatched) |
            (Dispatched, Reported) | (Dispatched, LockLost) | (Dispatched, Errored) |
            (Reported, Idle) | (LockLost, Idle) | (Errored, Idle)
        )
    }

    /// Check if the job in hand has reached an outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Reported | Self::LockLost | Self::Errored)
    }
}

impl std::fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Claimed => "claimed",
            Self::Locked => "locked",
            Self::Dispatched => "dispatched",
            Self::Reported => "reported",
            Self::LockLost => "lock_lost",
            Self::Errored => "errored",
        };
        write!(f, "{s}")
    }
}

/// State shared between the main loop, the heartbeat and the log emitter.
///
/// Only the main loop writes the current job and phase; the background loops
/// read them and watch the exit flag.
pub struct RuntimeState {
    current: watch::Sender<Option<CurrentJob>>,
    phase: watch::Sender<WorkerPhase>,
    exit: watch::Sender<bool>,
}

impl RuntimeState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: watch::Sender::new(None),
            phase: watch::Sender::new(WorkerPhase::Idle),
            exit: watch::Sender::new(false),
        })
    }

    // ── Current job ─────────────────────────────────────────────────

    pub fn current_job(&self) -> Option<CurrentJob> {
        self.current.borrow().clone()
    }

    pub fn current_job_id(&self) -> Option<String> {
        self.current.borrow().as_ref().map(|job| job.job_id.clone())
    }

    pub(crate) fn set_current(&self, job: CurrentJob) {
        self.current.send_replace(Some(job));
    }

    /// Forget the current job. Returns what was held.
    pub(crate) fn clear_current(&self) -> Option<CurrentJob> {
        self.current.send_replace(None)
    }

    // ── Phase ───────────────────────────────────────────────────────

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.borrow()
    }

    /// Move to `target`, logging transitions the state machine does not allow.
    pub(crate) fn transition_to(&self, target: WorkerPhase) {
        let from = self.phase.send_replace(target);
        if !from.can_transition_to(target) {
            tracing::warn!(%from, to = %target, "Unexpected worker phase transition");
        }
    }

    /// Subscribe to phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<WorkerPhase> {
        self.phase.subscribe()
    }

    // ── Exit flag ───────────────────────────────────────────────────

    pub fn request_exit(&self) {
        self.exit.send_replace(true);
    }

    pub fn is_exiting(&self) -> bool {
        *self.exit.borrow()
    }

    /// Resolve once exit has been requested.
    pub async fn exited(&self) {
        let mut rx = self.exit.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|exiting| *exiting).await;
    }
}

/// Cloneable handle for requesting shutdown from outside the worker.
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<RuntimeState>,
}

impl ShutdownHandle {
    pub(crate) fn new(state: Arc<RuntimeState>) -> Self {
        Self { state }
    }

    /// Ask the worker and its background loops to stop.
    pub fn stop(&self) {
        self.state.request_exit();
    }

    pub fn is_stopping(&self) -> bool {
        self.state.is_exiting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn phase_transitions_valid() {
        use WorkerPhase::*;
        assert!(Idle.can_transition_to(Claimed));
        assert!(Claimed.can_transition_to(Locked));
        assert!(Locked.can_transition_to(Dispatched));
        assert!(Dispatched.can_transition_to(Reported));
        assert!(Dispatched.can_transition_to(LockLost));
        assert!(Dispatched.can_transition_to(Errored));
        assert!(LockLost.can_transition_to(Idle));
    }

    #[test]
    fn phase_transitions_invalid() {
        use WorkerPhase::*;
        assert!(!Idle.can_transition_to(Dispatched));
        assert!(!Locked.can_transition_to(Reported));
        assert!(!Reported.can_transition_to(Dispatched));
        assert!(!LockLost.can_transition_to(Reported));
    }

    #[test]
    fn terminal_phases() {
        assert!(WorkerPhase::Reported.is_terminal());
        assert!(WorkerPhase::LockLost.is_terminal());
        assert!(WorkerPhase::Errored.is_terminal());
        assert!(!WorkerPhase::Dispatched.is_terminal());
        assert_eq!(WorkerPhase::LockLost.to_string(), "lock_lost");
    }

    #[test]
    fn current_job_set_and_clear() {
        let state = RuntimeState::new();
        assert!(state.current_job().is_none());

        state.set_current(CurrentJob {
            job_id: "j1".into(),
            pipeline: "a".into(),
        });
        assert_eq!(state.current_job_id().as_deref(), Some("j1"));

        let cleared = state.clear_current();
        assert_eq!(cleared.map(|j| j.job_id).as_deref(), Some("j1"));
        assert!(state.current_job_id().is_none());
    }

    #[tokio::test]
    async fn exited_resolves_after_stop() {
        let state = RuntimeState::new();
        let handle = ShutdownHandle::new(Arc::clone(&state));

        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.exited().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("exit should be observed")
            .unwrap();
        assert!(state.is_exiting());
        assert!(handle.is_stopping());
    }

    #[tokio::test]
    async fn exited_resolves_when_already_stopped() {
        let state = RuntimeState::new();
        state.request_exit();
        tokio::time::timeout(Duration::from_secs(1), state.exited())
            .await
            .expect("already-set flag resolves immediately");
    }
}
