//! Upload dependency graph.
//!
//! Built inside the send transaction. Each distinct payload gets one upload
//! chain (compress → resumable upload spec → upload). Later occurrences of the
//! same payload get their own copied attachment row and hang off a single copy
//! job appended to that chain. Nothing is submitted here; the chains are handed
//! back for submission after commit.

use std::collections::HashMap;

use tracing::debug;

use crate::jobs::{Job, JobChain, JobKind};
use crate::message::{Attachment, MediaKey, StoryType};
use crate::store::{AttachmentStager, StoreTransaction};
use crate::types::{AttachmentId, JobId, MessageId};
use crate::{DispatchError, DispatchResult};

/// One attachment row in the graph and the job that materializes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadNode {
    pub media_key: MediaKey,
    pub attachment_id: AttachmentId,
    pub job_id: JobId,
}

/// Upload chain for one distinct payload.
struct PayloadUpload {
    source: AttachmentId,
    chain: JobChain,
    copy_job_id: Option<JobId>,
    copies: Vec<AttachmentId>,
}

impl PayloadUpload {
    fn start(source: AttachmentId) -> (Self, JobId) {
        let upload = Job::new(JobKind::AttachmentUpload {
            attachment_id: source,
        });
        let upload_id = upload.id.clone();
        let chain = JobChain::start(Job::new(JobKind::AttachmentCompression {
            attachment_id: source,
        }))
        .then(Job::new(JobKind::ResumableUploadSpec))
        .then(upload);

        (
            Self {
                source,
                chain,
                copy_job_id: None,
                copies: Vec::new(),
            },
            upload_id,
        )
    }

    fn add_copy(&mut self, destination: AttachmentId) -> JobId {
        self.copies.push(destination);
        self.copy_job_id.get_or_insert_with(JobId::new).clone()
    }

    fn finish(self) -> JobChain {
        match self.copy_job_id {
            Some(id) => self.chain.then(Job {
                id,
                kind: JobKind::AttachmentCopy {
                    source: self.source,
                    destinations: self.copies,
                },
            }),
            None => self.chain,
        }
    }
}

/// Upload nodes per batch member plus the deferred chains that produce them.
pub struct UploadDependencyGraph {
    nodes: Vec<Vec<UploadNode>>,
    uploads: Vec<PayloadUpload>,
}

impl UploadDependencyGraph {
    /// Stages every attachment of every batch member.
    ///
    /// `batch[i]` holds the attachments of message `i`.
    pub fn build<A>(stager: &A, batch: &[Vec<Attachment>]) -> DispatchResult<Self>
    where
        A: AttachmentStager + ?Sized,
    {
        let mut by_key: HashMap<MediaKey, usize> = HashMap::new();
        let mut uploads: Vec<PayloadUpload> = Vec::new();
        let mut nodes = Vec::with_capacity(batch.len());

        for attachments in batch {
            let mut message_nodes = Vec::with_capacity(attachments.len());
            for attachment in attachments {
                let media_key = attachment.media_key();
                let node = match by_key.get(&media_key) {
                    Some(&index) => {
                        let upload = &mut uploads[index];
                        let attachment_id = stager.stage_copy(upload.source)?;
                        let job_id = upload.add_copy(attachment_id);
                        UploadNode {
                            media_key,
                            attachment_id,
                            job_id,
                        }
                    }
                    None => {
                        let attachment_id = stager.stage(attachment)?;
                        let (upload, job_id) = PayloadUpload::start(attachment_id);
                        by_key.insert(media_key.clone(), uploads.len());
                        uploads.push(upload);
                        UploadNode {
                            media_key,
                            attachment_id,
                            job_id,
                        }
                    }
                };
                message_nodes.push(node);
            }
            nodes.push(message_nodes);
        }

        debug!(
            messages = nodes.len(),
            uploads = uploads.len(),
            "Built upload dependency graph"
        );
        Ok(Self { nodes, uploads })
    }

    pub fn nodes(&self, index: usize) -> &[UploadNode] {
        self.nodes.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Job ids message `index` must wait for, without duplicates.
    pub fn dependency_job_ids(&self, index: usize) -> Vec<JobId> {
        let mut ids: Vec<JobId> = Vec::new();
        for node in self.nodes(index) {
            if !ids.contains(&node.job_id) {
                ids.push(node.job_id.clone());
            }
        }
        ids
    }

    /// Number of physical upload chains.
    pub fn upload_count(&self) -> usize {
        self.uploads.len()
    }

    /// Ties message `index`'s nodes to its row in one update.
    ///
    /// Non-story messages also get the body stamped as caption. A media story
    /// with no nodes fails with [`DispatchError::MissingAttachment`]; a text
    /// story or a plain message with no nodes is skipped.
    pub fn associate(
        &self,
        tx: &dyn StoreTransaction,
        index: usize,
        message_id: MessageId,
        story_type: StoryType,
        body: Option<&str>,
    ) -> DispatchResult<()> {
        let nodes = self.nodes(index);
        ensure_story_media(story_type, !nodes.is_empty(), message_id)?;

        let ids: Vec<AttachmentId> = nodes.iter().map(|node| node.attachment_id).collect();
        associate_with_caption(tx, &ids, message_id, story_type, body)
    }

    /// Chains to submit once the transaction committed.
    pub fn into_deferred_chains(self) -> Vec<JobChain> {
        self.uploads.into_iter().map(PayloadUpload::finish).collect()
    }
}

/// Fails for a media story that ended up with no attachments.
pub(crate) fn ensure_story_media(
    story_type: StoryType,
    has_media: bool,
    message_id: MessageId,
) -> DispatchResult<()> {
    if !has_media && story_type.is_story() && !story_type.is_text_story() {
        return Err(DispatchError::MissingAttachment(message_id));
    }
    Ok(())
}

/// Ties attachment rows to a message in one update and, for non-story
/// messages, stamps the body on each as caption.
pub(crate) fn associate_with_caption(
    tx: &dyn StoreTransaction,
    ids: &[AttachmentId],
    message_id: MessageId,
    story_type: StoryType,
    body: Option<&str>,
) -> DispatchResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    tx.associate_attachments(ids, message_id, story_type.is_story())?;

    if !story_type.is_story() {
        if let Some(caption) = body.filter(|body| !body.is_empty()) {
            for id in ids {
                tx.set_caption(*id, caption)?;
            }
        }
    }
    Ok(())
}
