//! Turns a classified, persisted message into its send job.

use std::sync::Arc;

use tracing::{debug, info};

use crate::classifier::PathKind;
use crate::jobs::{Job, JobKind, JobScheduler};
use crate::message::MessageClass;
use crate::recipient::Recipient;
use crate::types::{JobId, MessageId, QueueKey, RecipientId};
use crate::DispatchResult;

/// A persisted message waiting for its send job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSend {
    pub message_id: MessageId,
    pub recipient: Recipient,
    pub path: PathKind,
    pub class: MessageClass,
    /// Upload jobs the send must wait for.
    pub dependencies: Vec<JobId>,
    /// Group members to restrict a resend to. Empty means everyone.
    pub filter: Vec<RecipientId>,
}

impl PlannedSend {
    pub fn new(message_id: MessageId, recipient: Recipient, path: PathKind, class: MessageClass) -> Self {
        Self {
            message_id,
            recipient,
            path,
            class,
            dependencies: Vec::new(),
            filter: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<JobId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_filter(mut self, filter: Vec<RecipientId>) -> Self {
        self.filter = filter;
        self
    }
}

/// Submits send jobs with the right predecessors and queue key.
#[derive(Clone)]
pub struct JobEnqueuer {
    scheduler: Arc<dyn JobScheduler>,
}

impl JobEnqueuer {
    pub fn new(scheduler: Arc<dyn JobScheduler>) -> Self {
        Self { scheduler }
    }

    /// Submits the send job for `send`.
    ///
    /// Returns `None` for [`PathKind::LocalSelf`], which never gets a job.
    pub fn enqueue(&self, send: &PlannedSend) -> DispatchResult<Option<JobId>> {
        let Some((job, predecessors, queue_key)) = Self::send_job(send) else {
            debug!(message_id = %send.message_id, "Local self-send, no job submitted");
            return Ok(None);
        };

        info!(
            message_id = %send.message_id,
            recipient = %send.recipient.id(),
            job = job.kind.name(),
            dependencies = predecessors.len(),
            queue_key = queue_key.as_ref().map(QueueKey::as_str),
            "Enqueueing send job"
        );
        let id = self.scheduler.submit(job, &predecessors, queue_key)?;
        Ok(Some(id))
    }

    fn send_job(send: &PlannedSend) -> Option<(Job, Vec<JobId>, Option<QueueKey>)> {
        let message_id = send.message_id;
        let recipient_id = send.recipient.id();
        let has_dependencies = !send.dependencies.is_empty();

        let planned = match send.path {
            PathKind::LocalSelf => return None,
            PathKind::PushIndividual => {
                let kind = match send.class {
                    MessageClass::Text => JobKind::PushTextSend {
                        message_id,
                        recipient_id,
                    },
                    MessageClass::Media => JobKind::PushMediaSend {
                        message_id,
                        recipient_id,
                    },
                };
                (Job::new(kind), send.dependencies.clone(), None)
            }
            PathKind::PushGroup => (
                Job::new(JobKind::PushGroupSend {
                    message_id,
                    recipient_id,
                    filter: send.filter.clone(),
                    has_dependencies,
                }),
                send.dependencies.clone(),
                Some(send.recipient.queue_key()),
            ),
            PathKind::PushDistributionList => (
                Job::new(JobKind::PushDistributionListSend {
                    message_id,
                    recipient_id,
                    filter: send.filter.clone(),
                    has_dependencies,
                }),
                send.dependencies.clone(),
                Some(send.recipient.queue_key()),
            ),
            PathKind::LegacyTransport => {
                let kind = match send.class {
                    MessageClass::Text => JobKind::SmsSend {
                        message_id,
                        recipient_id,
                    },
                    MessageClass::Media => JobKind::MmsSend { message_id },
                };
                (Job::new(kind), Vec::new(), None)
            }
        };
        Some(planned)
    }
}
