//! Two-phase dispatch.
//!
//! Phase 1 runs inside the store transaction and only records what must happen
//! in a [`DispatchPlan`]. Phase 2 ([`DispatchPlan::execute`]) runs after the
//! commit and performs the side-effects:
//!
//! ```text
//! deferred chains → standalone jobs → sends (self-send or enqueue) → signal → touch threads
//! ```
//!
//! A plan whose transaction rolled back is dropped unexecuted.

use std::collections::HashSet;

use tracing::{debug, error, warn};

use crate::classifier::PathKind;
use crate::enqueuer::{JobEnqueuer, PlannedSend};
use crate::jobs::{Job, JobChain};
use crate::self_send::LocalSelfSend;
use crate::sender::Collaborators;
use crate::store::OutboxStore;
use crate::types::{JobId, QueueKey, ThreadId};
use crate::{DispatchError, DispatchResult};

/// A job submitted on its own, after the chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredJob {
    pub job: Job,
    pub predecessors: Vec<JobId>,
    pub queue_key: Option<QueueKey>,
}

impl DeferredJob {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            predecessors: Vec::new(),
            queue_key: None,
        }
    }

    pub fn after(mut self, predecessors: Vec<JobId>) -> Self {
        self.predecessors = predecessors;
        self
    }

    pub fn keyed(mut self, queue_key: QueueKey) -> Self {
        self.queue_key = Some(queue_key);
        self
    }
}

/// Side-effects recorded during phase 1.
#[derive(Debug, Default)]
pub struct DispatchPlan {
    chains: Vec<JobChain>,
    jobs: Vec<DeferredJob>,
    sends: Vec<PlannedSend>,
    threads: Vec<ThreadId>,
}

impl DispatchPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chains(&mut self, chains: impl IntoIterator<Item = JobChain>) {
        self.chains
            .extend(chains.into_iter().filter(|chain| !chain.is_empty()));
    }

    pub fn add_job(&mut self, job: DeferredJob) {
        self.jobs.push(job);
    }

    pub fn add_jobs(&mut self, jobs: impl IntoIterator<Item = DeferredJob>) {
        self.jobs.extend(jobs);
    }

    pub fn add_send(&mut self, send: PlannedSend) {
        self.sends.push(send);
    }

    pub fn touch_thread(&mut self, thread_id: ThreadId) {
        if !self.threads.contains(&thread_id) {
            self.threads.push(thread_id);
        }
    }

    pub fn chains(&self) -> &[JobChain] {
        &self.chains
    }

    pub fn jobs(&self) -> &[DeferredJob] {
        &self.jobs
    }

    pub fn sends(&self) -> &[PlannedSend] {
        &self.sends
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty() && self.jobs.is_empty() && self.sends.is_empty()
    }

    /// Runs phase 2. Call only after the transaction that built the plan committed.
    ///
    /// Every step is attempted even when an earlier one fails. A send is marked
    /// failed instead of submitted when a job it waits on could not be
    /// submitted, and also when its own submission fails. The "message sent"
    /// signal fires once if at least one send went out. The first failure is
    /// returned.
    pub fn execute<S>(self, store: &S, collaborators: &Collaborators) -> DispatchResult<()>
    where
        S: OutboxStore + ?Sized,
    {
        let mut first_error: Option<DispatchError> = None;
        let mut lost: HashSet<JobId> = HashSet::new();
        let scheduler = collaborators.scheduler.as_ref();

        for chain in self.chains {
            let ids = chain.job_ids();
            if let Err(e) = chain.enqueue(scheduler) {
                error!(error = %e, jobs = ids.len(), "Failed to enqueue upload chain");
                lost.extend(ids);
                first_error.get_or_insert(e);
            }
        }

        for deferred in self.jobs {
            let name = deferred.job.kind.name();
            let id = deferred.job.id.clone();
            if deferred.predecessors.iter().any(|p| lost.contains(p)) {
                warn!(job = name, "Predecessor was never submitted, dropping job");
                lost.insert(id);
                continue;
            }
            if let Err(e) = scheduler.submit(deferred.job, &deferred.predecessors, deferred.queue_key) {
                error!(error = %e, job = name, "Failed to submit job");
                lost.insert(id);
                first_error.get_or_insert(e);
            }
        }

        let enqueuer = JobEnqueuer::new(collaborators.scheduler.clone());
        let self_send = LocalSelfSend::new(scheduler, collaborators.expiration.as_ref());
        let mut dispatched = 0usize;
        for send in &self.sends {
            let result = if send.dependencies.iter().any(|d| lost.contains(d)) {
                Err(DispatchError::JobSubmission(format!(
                    "upload jobs for message {} were not submitted",
                    send.message_id
                )))
            } else {
                match send.path {
                    PathKind::LocalSelf => self_send.complete(store, send.message_id),
                    _ => enqueuer.enqueue(send).map(|_| ()),
                }
            };
            match result {
                Ok(()) => dispatched += 1,
                Err(e) => {
                    error!(message_id = %send.message_id, error = %e, "Failed to dispatch message, marking failed");
                    if let Err(mark_err) = store.transaction(|tx| tx.mark_failed(send.message_id)) {
                        error!(message_id = %send.message_id, error = %mark_err, "Failed to mark message failed");
                    }
                    first_error.get_or_insert(e);
                }
            }
        }

        if dispatched > 0 {
            collaborators.events.message_sent();
        }

        if !self.threads.is_empty() {
            let threads = self.threads;
            let touched = store.transaction(|tx| {
                for thread_id in &threads {
                    tx.touch_thread(*thread_id)?;
                }
                Ok(())
            });
            if let Err(e) = touched {
                warn!(error = %e, count = threads.len(), "Failed to touch threads");
            }
        }

        debug!(dispatched, failed = first_error.is_some(), "Executed dispatch plan");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
