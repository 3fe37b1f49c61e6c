//! Orchestrator state
//!
//! One owned record holding the active task, its cancellation token and the
//! iteration lease. Entry is guarded by a single-permit semaphore so at most
//! one task is in flight per process; the permit lives inside the slot and is
//! released when the slot is cleared.
//!
//! Every slot gets a fresh generation from a process-wide counter, and the
//! epoch of a slot increases on every `resume`. Queued iterations carry the
//! lease they were posted under and are dropped when it no longer matches,
//! so work left over from an aborted run can never touch a later one.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Identifies one run of one task and the resume epoch within it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub generation: u64,
    pub epoch: u64,
}

struct Slot {
    task_id: String,
    lease: Lease,
    token: CancellationToken,
    /// Set by takeover, cleared by resume
    suspended: bool,
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    fn holds(&self, task_id: &str, generation: u64) -> bool {
        self.task_id == task_id && self.lease.generation == generation
    }
}

#[derive(Default)]
struct Inner {
    slot: Option<Slot>,
    generations: u64,
}

/// What a caller gets back after entering or resuming
#[derive(Debug, Clone)]
pub struct Ticket {
    pub lease: Lease,
    pub token: CancellationToken,
}

pub struct OrchestratorState {
    gate: Arc<Semaphore>,
    inner: Mutex<Inner>,
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorState {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(1)),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the single in-flight slot for `task_id`.
    ///
    /// Returns `None` without waiting when another task holds it.
    pub fn try_enter(&self, task_id: &str) -> Option<Ticket> {
        let permit = Arc::clone(&self.gate).try_acquire_owned().ok()?;
        let token = CancellationToken::new();

        let mut inner = self.lock();
        inner.generations += 1;
        let lease = Lease {
            generation: inner.generations,
            epoch: 0,
        };
        inner.slot = Some(Slot {
            task_id: task_id.to_string(),
            lease,
            token: token.clone(),
            suspended: false,
            _permit: permit,
        });
        Some(Ticket { lease, token })
    }

    /// Release the slot if the run `generation` of `task_id` still holds it
    pub fn exit(&self, task_id: &str, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.slot.as_ref().map(|s| s.holds(task_id, generation)).unwrap_or(false) {
            inner.slot = None;
            true
        } else {
            false
        }
    }

    /// True while the run `generation` of `task_id` holds the slot
    pub fn holds(&self, task_id: &str, generation: u64) -> bool {
        self.lock()
            .slot
            .as_ref()
            .map(|s| s.holds(task_id, generation))
            .unwrap_or(false)
    }

    /// Cancel the active token and release the slot, whatever task holds it.
    ///
    /// Returns the task that was in flight.
    pub fn abort(&self) -> Option<String> {
        let slot = self.lock().slot.take()?;
        slot.token.cancel();
        Some(slot.task_id)
    }

    /// Mint the token for one iteration of `task_id` posted under `lease`.
    ///
    /// `None` when the slot was released, taken by another run, superseded
    /// by a resume, or is suspended by a takeover.
    pub fn begin_iteration(&self, task_id: &str, lease: Lease) -> Option<CancellationToken> {
        let mut inner = self.lock();
        let slot = inner.slot.as_mut()?;
        if slot.task_id != task_id || slot.lease != lease || slot.suspended {
            return None;
        }
        slot.token = CancellationToken::new();
        Some(slot.token.clone())
    }

    /// Cancel the outbound call of `task_id` and hold further iterations
    pub fn suspend(&self, task_id: &str) -> bool {
        let mut inner = self.lock();
        match inner.slot.as_mut() {
            Some(slot) if slot.task_id == task_id => {
                slot.token.cancel();
                slot.suspended = true;
                true
            }
            _ => false,
        }
    }

    /// Lift a takeover: fresh token, next epoch
    pub fn resume(&self, task_id: &str) -> Option<Ticket> {
        let mut inner = self.lock();
        let slot = inner.slot.as_mut()?;
        if slot.task_id != task_id {
            return None;
        }
        slot.lease.epoch += 1;
        slot.suspended = false;
        slot.token = CancellationToken::new();
        Some(Ticket {
            lease: slot.lease,
            token: slot.token.clone(),
        })
    }

    /// True while `task_id` holds the slot under `lease` and is not suspended
    pub fn is_current(&self, task_id: &str, lease: Lease) -> bool {
        self.lock()
            .slot
            .as_ref()
            .map(|s| s.task_id == task_id && s.lease == lease && !s.suspended)
            .unwrap_or(false)
    }

    pub fn is_suspended(&self, task_id: &str) -> bool {
        self.lock()
            .slot
            .as_ref()
            .map(|s| s.task_id == task_id && s.suspended)
            .unwrap_or(false)
    }

    pub fn current_task_id(&self) -> Option<String> {
        self.lock().slot.as_ref().map(|s| s.task_id.clone())
    }

    pub fn is_running(&self) -> bool {
        self.lock().slot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight() {
        let state = OrchestratorState::new();
        let a = state.try_enter("a").unwrap();
        assert!(state.try_enter("b").is_none());
        assert_eq!(state.current_task_id().as_deref(), Some("a"));

        assert!(!state.exit("b", a.lease.generation));
        assert!(state.exit("a", a.lease.generation));
        assert!(!state.is_running());
        assert!(state.try_enter("b").is_some());
    }

    #[test]
    fn test_abort_cancels_and_releases() {
        let state = OrchestratorState::new();
        let ticket = state.try_enter("a").unwrap();
        let token = state.begin_iteration("a", ticket.lease).unwrap();

        assert_eq!(state.abort().as_deref(), Some("a"));
        assert!(token.is_cancelled());
        assert!(state.try_enter("b").is_some());
        assert!(state.abort().is_some());
        assert!(state.abort().is_none());
    }

    #[test]
    fn test_each_iteration_gets_fresh_token() {
        let state = OrchestratorState::new();
        let ticket = state.try_enter("a").unwrap();
        let first = state.begin_iteration("a", ticket.lease).unwrap();
        let second = state.begin_iteration("a", ticket.lease).unwrap();

        state.suspend("a");
        assert!(!first.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_suspend_holds_iterations_until_resume() {
        let state = OrchestratorState::new();
        let entered = state.try_enter("a").unwrap();

        assert!(!state.suspend("other"));
        assert!(state.suspend("a"));
        assert!(state.is_suspended("a"));
        assert!(state.begin_iteration("a", entered.lease).is_none());
        assert!(!state.is_current("a", entered.lease));

        let resumed = state.resume("a").unwrap();
        assert_eq!(resumed.lease.epoch, 1);
        assert_eq!(resumed.lease.generation, entered.lease.generation);
        assert!(!resumed.token.is_cancelled());
        // iterations queued before the resume are stale
        assert!(state.begin_iteration("a", entered.lease).is_none());
        assert!(state.begin_iteration("a", resumed.lease).is_some());
    }

    #[test]
    fn test_resume_of_other_task_ignored() {
        let state = OrchestratorState::new();
        let ticket = state.try_enter("a").unwrap();
        assert!(state.resume("b").is_none());
        assert!(state.is_current("a", ticket.lease));
    }

    #[test]
    fn test_reentered_task_rejects_work_of_aborted_run() {
        let state = OrchestratorState::new();
        let old = state.try_enter("a").unwrap();
        state.abort();
        let new = state.try_enter("a").unwrap();

        assert_ne!(old.lease, new.lease);
        assert!(state.begin_iteration("a", old.lease).is_none());
        assert!(!state.is_current("a", old.lease));
        assert!(!state.holds("a", old.lease.generation));

        // the old run cannot release the new one
        assert!(!state.exit("a", old.lease.generation));
        assert_eq!(state.current_task_id().as_deref(), Some("a"));
        assert!(state.begin_iteration("a", new.lease).is_some());
        assert!(state.exit("a", new.lease.generation));
    }
}
