//! Pre-uploaded attachments.
//!
//! A pre-upload stages an attachment row with no owning message and starts its
//! upload chain right away. The returned [`PreUploadResult`] can later be tied
//! to one message directly, or copied onto any number of messages so a single
//! physical upload serves all of them.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::jobs::{Job, JobChain, JobKind};
use crate::message::{Attachment, MediaRef};
use crate::plan::DeferredJob;
use crate::store::StoreTransaction;
use crate::types::{AttachmentId, JobId};
use crate::DispatchResult;

/// A staged upload not yet tied to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreUploadResult {
    media: MediaRef,
    attachment_id: AttachmentId,
    job_ids: Vec<JobId>,
}

impl PreUploadResult {
    pub fn new(media: MediaRef, attachment_id: AttachmentId, job_ids: Vec<JobId>) -> Self {
        Self {
            media,
            attachment_id,
            job_ids,
        }
    }

    pub fn media(&self) -> &MediaRef {
        &self.media
    }

    pub fn attachment_id(&self) -> AttachmentId {
        self.attachment_id
    }

    /// Compression, upload spec and upload job ids, in chain order.
    pub fn job_ids(&self) -> &[JobId] {
        &self.job_ids
    }
}

impl fmt::Display for PreUploadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let jobs: Vec<String> = self.job_ids.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{{ID: {}, URI: {}, Jobs: [{}]}}",
            self.attachment_id,
            self.media.uri,
            jobs.join(", ")
        )
    }
}

/// Inserts the unowned row and builds its upload chain.
///
/// The chain is returned unsubmitted; it goes to the scheduler after commit.
pub fn stage(
    tx: &dyn StoreTransaction,
    attachment: &Attachment,
    media: MediaRef,
) -> DispatchResult<(PreUploadResult, JobChain)> {
    let attachment_id = tx.insert_attachment_for_pre_upload(attachment)?;

    let chain = JobChain::start(Job::new(JobKind::AttachmentCompression { attachment_id }))
        .then(Job::new(JobKind::ResumableUploadSpec))
        .then(Job::new(JobKind::AttachmentUpload { attachment_id }));
    let result = PreUploadResult::new(media, attachment_id, chain.job_ids());

    debug!(attachment_id = %attachment_id, "Staged pre-upload");
    Ok((result, chain))
}

/// Attachment rows and jobs that tie a set of pre-uploads to one message.
#[derive(Debug, Default)]
pub struct PreUploadLink {
    pub attachment_ids: Vec<AttachmentId>,
    /// Jobs the message's send must wait for.
    pub dependencies: Vec<JobId>,
    /// Copy jobs to submit after commit.
    pub copy_jobs: Vec<DeferredJob>,
}

/// Takes each staged row for the message while it is still unowned.
///
/// A pre-upload already tied to an earlier message is copied instead, so a
/// reused [`PreUploadResult`] never moves media off a queued message.
pub fn link_original(
    tx: &dyn StoreTransaction,
    results: &[PreUploadResult],
) -> DispatchResult<PreUploadLink> {
    let mut link = PreUploadLink {
        dependencies: all_job_ids(results),
        ..PreUploadLink::default()
    };

    for result in results {
        if tx.attachment_is_unowned(result.attachment_id)? {
            link.attachment_ids.push(result.attachment_id);
        } else {
            debug!(attachment_id = %result.attachment_id, "Pre-upload already claimed, copying");
            link.push_copy(tx, result)?;
        }
    }
    Ok(link)
}

/// Copies every staged row for one more destination message.
///
/// Each copy gets its own copy job, which waits on the source's upload chain.
pub fn link_copies(
    tx: &dyn StoreTransaction,
    results: &[PreUploadResult],
) -> DispatchResult<PreUploadLink> {
    let mut link = PreUploadLink {
        dependencies: all_job_ids(results),
        ..PreUploadLink::default()
    };

    for result in results {
        link.push_copy(tx, result)?;
    }
    Ok(link)
}

impl PreUploadLink {
    fn push_copy(&mut self, tx: &dyn StoreTransaction, result: &PreUploadResult) -> DispatchResult<()> {
        let copy = tx.copy_attachment_for_pre_upload(result.attachment_id)?;
        let job = Job::new(JobKind::AttachmentCopy {
            source: result.attachment_id,
            destinations: vec![copy],
        });
        self.dependencies.push(job.id.clone());
        self.copy_jobs
            .push(DeferredJob::new(job).after(result.job_ids.clone()));
        self.attachment_ids.push(copy);
        Ok(())
    }
}

fn all_job_ids(results: &[PreUploadResult]) -> Vec<JobId> {
    results
        .iter()
        .flat_map(|result| result.job_ids.iter().cloned())
        .collect()
}
