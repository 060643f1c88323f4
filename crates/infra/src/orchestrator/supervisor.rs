//! In-memory registry of live pipeline runs.
//!
//! One entry per job that is claimed: either an orchestrator call is working
//! on it or its background task is running. At most one claim exists per job,
//! which serializes start, retry, cancel and maintenance for that job. Entries
//! are tagged with a run id so a run that finishes late never removes the
//! entry of a newer run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pixforge_core::JobId;
use tokio::task::JoinHandle;

/// Cooperative cancellation flag, polled at step boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Run {
    run_id: u64,
    cancel: CancelFlag,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
pub(crate) struct Supervisor {
    runs: Mutex<HashMap<JobId, Run>>,
    next_run: AtomicU64,
}

impl Supervisor {
    fn runs(&self) -> MutexGuard<'_, HashMap<JobId, Run>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take exclusive hold of `job_id`. `None` while another claim or a
    /// running task holds it.
    pub(crate) fn try_claim(&self, job_id: JobId) -> Option<Claim<'_>> {
        let mut runs = self.runs();
        if runs.contains_key(&job_id) {
            return None;
        }
        let run_id = self.next_run.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelFlag::default();
        runs.insert(
            job_id,
            Run {
                run_id,
                cancel: cancel.clone(),
                task: None,
            },
        );
        Some(Claim {
            supervisor: self,
            job_id,
            run_id,
            cancel,
            armed: true,
        })
    }

    /// Store the task handle; dropped (detached) if the run already finished.
    pub(crate) fn attach(&self, job_id: JobId, run_id: u64, task: JoinHandle<()>) {
        if let Some(run) = self.runs().get_mut(&job_id) {
            if run.run_id == run_id {
                run.task = Some(task);
            }
        }
    }

    pub(crate) fn finish(&self, job_id: JobId, run_id: u64) {
        let mut runs = self.runs();
        if runs.get(&job_id).is_some_and(|r| r.run_id == run_id) {
            runs.remove(&job_id);
        }
    }

    /// Flag the live run for cancellation. `false` if there is none.
    pub(crate) fn request_cancel(&self, job_id: JobId) -> bool {
        match self.runs().get(&job_id) {
            Some(run) => {
                run.cancel.set();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_claimed(&self, job_id: JobId) -> bool {
        self.runs().contains_key(&job_id)
    }

    pub(crate) fn running(&self) -> usize {
        self.runs().len()
    }

    pub(crate) fn take_task(&self, job_id: JobId) -> Option<JoinHandle<()>> {
        self.runs().get_mut(&job_id).and_then(|r| r.task.take())
    }

    /// Flag every live run.
    pub(crate) fn cancel_all(&self) -> usize {
        let runs = self.runs();
        for run in runs.values() {
            run.cancel.set();
        }
        runs.len()
    }
}

/// Exclusive hold on one job. Released on drop unless handed to a task.
#[derive(Debug)]
pub(crate) struct Claim<'a> {
    supervisor: &'a Supervisor,
    job_id: JobId,
    run_id: u64,
    cancel: CancelFlag,
    armed: bool,
}

impl Claim<'_> {
    /// Transfer the hold to a background task, which must call
    /// [`Supervisor::finish`] with the returned run id when it ends.
    pub(crate) fn hand_off(mut self) -> (u64, CancelFlag) {
        self.armed = false;
        (self.run_id, self.cancel.clone())
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.supervisor.finish(self.job_id, self.run_id);
        }
    }
}
