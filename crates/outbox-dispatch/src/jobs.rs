//! Job contracts for the external execution engine.
//!
//! The dispatcher never runs jobs. It describes them, wires their
//! predecessors and queue keys, and hands them to a [`JobScheduler`].
//!
//! # Contracts the engine must honour
//!
//! - A job with predecessors does not start until every predecessor succeeded
//! - Jobs sharing a [`QueueKey`] run strictly FIFO
//! - Jobs without a key have no ordering relative to each other

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::message::Reaction;
use crate::types::{AttachmentId, JobId, MessageId, QueueKey, RecipientId, ThreadId};
use crate::{DispatchError, DispatchResult};

/// The work a job performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    AttachmentCompression {
        attachment_id: AttachmentId,
    },
    ResumableUploadSpec,
    AttachmentUpload {
        attachment_id: AttachmentId,
    },
    /// Copies an uploaded attachment's transfer state onto other rows.
    AttachmentCopy {
        source: AttachmentId,
        destinations: Vec<AttachmentId>,
    },
    /// Local bookkeeping only: moves a self-sent attachment into the uploaded
    /// state without touching the network.
    AttachmentMarkUploaded {
        message_id: MessageId,
        attachment_id: AttachmentId,
    },
    PushTextSend {
        message_id: MessageId,
        recipient_id: RecipientId,
    },
    PushMediaSend {
        message_id: MessageId,
        recipient_id: RecipientId,
    },
    PushGroupSend {
        message_id: MessageId,
        recipient_id: RecipientId,
        filter: Vec<RecipientId>,
        has_dependencies: bool,
    },
    PushDistributionListSend {
        message_id: MessageId,
        recipient_id: RecipientId,
        filter: Vec<RecipientId>,
        has_dependencies: bool,
    },
    SmsSend {
        message_id: MessageId,
        recipient_id: RecipientId,
    },
    MmsSend {
        message_id: MessageId,
    },
    ReactionSend {
        message_id: MessageId,
        reaction: Reaction,
        remove: bool,
    },
    RemoteDeleteSend {
        message_id: MessageId,
    },
    ProfileKeySend {
        thread_id: ThreadId,
    },
}

impl JobKind {
    /// Returns false for jobs that only touch local state.
    pub fn requires_network(&self) -> bool {
        !matches!(
            self,
            Self::AttachmentCompression { .. } | Self::AttachmentMarkUploaded { .. }
        )
    }

    /// Returns true for the jobs that deliver a message to its recipient.
    pub fn is_message_send(&self) -> bool {
        matches!(
            self,
            Self::PushTextSend { .. }
                | Self::PushMediaSend { .. }
                | Self::PushGroupSend { .. }
                | Self::PushDistributionListSend { .. }
                | Self::SmsSend { .. }
                | Self::MmsSend { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AttachmentCompression { .. } => "attachment_compression",
            Self::ResumableUploadSpec => "resumable_upload_spec",
            Self::AttachmentUpload { .. } => "attachment_upload",
            Self::AttachmentCopy { .. } => "attachment_copy",
            Self::AttachmentMarkUploaded { .. } => "attachment_mark_uploaded",
            Self::PushTextSend { .. } => "push_text_send",
            Self::PushMediaSend { .. } => "push_media_send",
            Self::PushGroupSend { .. } => "push_group_send",
            Self::PushDistributionListSend { .. } => "push_distribution_list_send",
            Self::SmsSend { .. } => "sms_send",
            Self::MmsSend { .. } => "mms_send",
            Self::ReactionSend { .. } => "reaction_send",
            Self::RemoteDeleteSend { .. } => "remote_delete_send",
            Self::ProfileKeySend { .. } => "profile_key_send",
        }
    }
}

/// A unit of deferred work with a stable id assigned at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        Self {
            id: JobId::new(),
            kind,
        }
    }
}

/// Ordered stages of jobs. Every job in a stage depends on every job in the
/// stage before it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobChain {
    stages: Vec<Vec<Job>>,
}

impl JobChain {
    pub fn start(job: Job) -> Self {
        Self {
            stages: vec![vec![job]],
        }
    }

    pub fn start_all(jobs: Vec<Job>) -> Self {
        let mut chain = Self::default();
        chain.push_stage(jobs);
        chain
    }

    pub fn then(mut self, job: Job) -> Self {
        self.stages.push(vec![job]);
        self
    }

    pub fn then_all(mut self, jobs: Vec<Job>) -> Self {
        self.push_stage(jobs);
        self
    }

    fn push_stage(&mut self, jobs: Vec<Job>) {
        if !jobs.is_empty() {
            self.stages.push(jobs);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Vec<Job>] {
        &self.stages
    }

    /// Ids of every job in the chain, in stage order.
    pub fn job_ids(&self) -> Vec<JobId> {
        self.stages
            .iter()
            .flatten()
            .map(|job| job.id.clone())
            .collect()
    }

    /// Ids of the final stage. Work that depends on the whole chain waits on these.
    pub fn tail_ids(&self) -> Vec<JobId> {
        self.stages
            .last()
            .map(|stage| stage.iter().map(|job| job.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn into_stages(self) -> Vec<Vec<Job>> {
        self.stages
    }

    /// Hands the chain to the scheduler.
    pub fn enqueue(self, scheduler: &dyn JobScheduler) -> DispatchResult<()> {
        scheduler.submit_chain(self)
    }
}

/// Handle to the job execution engine.
pub trait JobScheduler: Send + Sync {
    /// Submits one job with its predecessors and optional ordering key.
    fn submit(
        &self,
        job: Job,
        predecessors: &[JobId],
        queue_key: Option<QueueKey>,
    ) -> DispatchResult<JobId>;

    /// Submits a chain stage by stage.
    fn submit_chain(&self, chain: JobChain) -> DispatchResult<()> {
        submit_stages(self, chain)
    }
}

/// Submits each stage with the previous stage's ids as predecessors.
pub fn submit_stages<S: JobScheduler + ?Sized>(scheduler: &S, chain: JobChain) -> DispatchResult<()> {
    let mut previous: Vec<JobId> = Vec::new();
    for stage in chain.into_stages() {
        let ids: Vec<JobId> = stage.iter().map(|job| job.id.clone()).collect();
        for job in stage {
            scheduler.submit(job, &previous, None)?;
        }
        previous = ids;
    }
    Ok(())
}

/// A job as the scheduler received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub job: Job,
    pub predecessors: Vec<JobId>,
    pub queue_key: Option<QueueKey>,
}

/// A scheduler that records submissions instead of running them.
///
/// Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    submitted: Mutex<Vec<SubmittedJob>>,
    chains: AtomicUsize,
    fail: AtomicBool,
    reject: Mutex<Option<fn(&JobKind) -> bool>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following submission fail until reset.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Makes submissions of matching jobs fail. Other jobs still go through.
    pub fn reject_where(&self, predicate: fn(&JobKind) -> bool) {
        *self.reject.lock().expect("lock poisoned") = Some(predicate);
    }

    pub fn submitted(&self) -> Vec<SubmittedJob> {
        self.submitted.lock().expect("lock poisoned").clone()
    }

    /// Submitted jobs that deliver a message.
    pub fn sends(&self) -> Vec<SubmittedJob> {
        self.submitted()
            .into_iter()
            .filter(|s| s.job.kind.is_message_send())
            .collect()
    }

    pub fn count_where(&self, predicate: impl Fn(&JobKind) -> bool) -> usize {
        self.submitted()
            .iter()
            .filter(|s| predicate(&s.job.kind))
            .count()
    }

    pub fn find(&self, id: &JobId) -> Option<SubmittedJob> {
        self.submitted().into_iter().find(|s| &s.job.id == id)
    }

    pub fn chain_count(&self) -> usize {
        self.chains.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.submitted.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.submitted.lock().expect("lock poisoned").clear();
        self.chains.store(0, Ordering::SeqCst);
    }
}

impl JobScheduler for RecordingScheduler {
    fn submit(
        &self,
        job: Job,
        predecessors: &[JobId],
        queue_key: Option<QueueKey>,
    ) -> DispatchResult<JobId> {
        let rejected = self
            .reject
            .lock()
            .expect("lock poisoned")
            .is_some_and(|predicate| predicate(&job.kind));
        if rejected || self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::JobSubmission(format!(
                "scheduler rejected {}",
                job.kind.name()
            )));
        }
        let id = job.id.clone();
        self.submitted
            .lock()
            .expect("lock poisoned")
            .push(SubmittedJob {
                job,
                predecessors: predecessors.to_vec(),
                queue_key,
            });
        Ok(id)
    }

    fn submit_chain(&self, chain: JobChain) -> DispatchResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::JobSubmission("scheduler rejected chain".to_string()));
        }
        self.chains.fetch_add(1, Ordering::SeqCst);
        submit_stages(self, chain)
    }
}
