//! The dispatcher's public face.
//!
//! Every operation follows the same shape:
//!
//! 1. Classify recipients (may hit registration discovery, outside any transaction)
//! 2. One store transaction: outbox rows, attachment staging, upload graph, plan
//! 3. After commit: execute the plan
//!
//! If step 2 fails nothing was written and nothing is submitted.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::classifier::{ClassifyRequest, DeliveryClassifier, PathKind, RegistrationDiscovery};
use crate::config::{AccountState, DispatchConfig};
use crate::enqueuer::PlannedSend;
use crate::events::EventSink;
use crate::expiration::ExpirationManager;
use crate::graph::{associate_with_caption, ensure_story_media, UploadDependencyGraph};
use crate::jobs::{Job, JobKind, JobScheduler};
use crate::message::{Attachment, MediaRef, MessageClass, OutgoingMessage, Reaction, SendReceipt, StoryType};
use crate::outbox::{OutboxEntry, OutboxWriter};
use crate::plan::{DeferredJob, DispatchPlan};
use crate::pre_upload::{self, PreUploadLink, PreUploadResult};
use crate::recipient::Recipient;
use crate::store::{OutboxStore, StoreTransaction};
use crate::types::{MessageId, RecipientId, ThreadId};
use crate::{DispatchError, DispatchResult};

/// External systems the dispatcher talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub scheduler: Arc<dyn JobScheduler>,
    pub discovery: Arc<dyn RegistrationDiscovery>,
    pub expiration: Arc<dyn ExpirationManager>,
    pub events: Arc<dyn EventSink>,
}

/// Outbound message dispatcher.
pub struct MessageSender<S: OutboxStore> {
    store: Arc<S>,
    collaborators: Collaborators,
    classifier: DeliveryClassifier,
    writer: OutboxWriter,
}

impl<S: OutboxStore> MessageSender<S> {
    pub fn new(
        store: Arc<S>,
        account: Arc<AccountState>,
        collaborators: Collaborators,
        config: &DispatchConfig,
    ) -> Self {
        let classifier = DeliveryClassifier::new(account, collaborators.discovery.clone());
        Self {
            store,
            collaborators,
            classifier,
            writer: OutboxWriter::new(config.universal_expire_timer()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn classifier(&self) -> &DeliveryClassifier {
        &self.classifier
    }

    // ========================================================================
    // Single messages
    // ========================================================================

    /// Sends a text message.
    pub fn send_text(
        &self,
        message: &OutgoingMessage,
        thread_hint: Option<ThreadId>,
        force_legacy: bool,
    ) -> DispatchResult<SendReceipt> {
        if message.class != MessageClass::Text || !message.attachments.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "text send needs a text message without attachments".to_string(),
            ));
        }
        info!(recipient = %message.recipient.id(), thread_id = ?thread_hint.map(|t| t.0), "Sending text message");

        let path = self.classifier.classify(
            &message.recipient,
            ClassifyRequest {
                force_legacy,
                key_exchange: message.key_exchange,
            },
        );

        let (receipt, plan) = self.store.transaction(|tx| {
            let entry = OutboxEntry::new(message)
                .in_thread(thread_hint)
                .force_legacy(force_legacy);
            let receipt = self.writer.write_one(tx, &entry)?;

            let mut plan = DispatchPlan::new();
            plan.add_send(PlannedSend::new(
                receipt.message_id,
                message.recipient.clone(),
                path,
                MessageClass::Text,
            ));
            plan.touch_thread(receipt.thread_id);
            Ok((receipt, plan))
        })?;

        self.execute(plan)?;
        Ok(receipt)
    }

    /// Sends a media message. Push paths upload through the dependency graph;
    /// other paths keep the attachments local.
    pub fn send_media(
        &self,
        message: &OutgoingMessage,
        thread_hint: Option<ThreadId>,
        force_legacy: bool,
    ) -> DispatchResult<SendReceipt> {
        if message.class != MessageClass::Media {
            return Err(DispatchError::InvalidRequest(
                "media send needs a media message".to_string(),
            ));
        }
        info!(
            recipient = %message.recipient.id(),
            attachments = message.attachments.len(),
            "Sending media message"
        );

        let path = self.classifier.classify(
            &message.recipient,
            ClassifyRequest {
                force_legacy,
                key_exchange: false,
            },
        );

        let (receipt, plan) = self.store.transaction(|tx| {
            let (stripped, attachments) = message.strip_attachments();
            let entry = OutboxEntry::new(&stripped)
                .in_thread(thread_hint)
                .force_legacy(force_legacy);
            let receipt = self.writer.write_one(tx, &entry)?;

            let mut plan = DispatchPlan::new();
            let dependencies = if path.is_push() {
                let graph = UploadDependencyGraph::build(tx, std::slice::from_ref(&attachments))?;
                graph.associate(tx, 0, receipt.message_id, message.story_type, message.body.as_deref())?;
                let dependencies = graph.dependency_job_ids(0);
                plan.add_chains(graph.into_deferred_chains());
                dependencies
            } else {
                stage_local(tx, &attachments, receipt.message_id, message.story_type, message.body.as_deref())?;
                Vec::new()
            };

            plan.add_send(
                PlannedSend::new(receipt.message_id, message.recipient.clone(), path, MessageClass::Media)
                    .with_dependencies(dependencies),
            );
            plan.touch_thread(receipt.thread_id);
            Ok((receipt, plan))
        })?;

        self.execute(plan)?;
        Ok(receipt)
    }

    // ========================================================================
    // Stories and broadcasts
    // ========================================================================

    /// Sends a batch of stories atomically.
    ///
    /// Identical media across the batch is uploaded once. A media story without
    /// attachments aborts the whole batch with [`DispatchError::MissingAttachment`].
    pub fn send_stories(&self, messages: &[OutgoingMessage]) -> DispatchResult<Vec<SendReceipt>> {
        info!(count = messages.len(), "Sending stories");
        let paths = self.classify_all(messages);

        let (receipts, plan) = self.store.transaction(|tx| {
            let mut plan = DispatchPlan::new();
            let mut stripped = Vec::with_capacity(messages.len());
            let mut uploads: Vec<Vec<Attachment>> = Vec::with_capacity(messages.len());
            let mut local: Vec<Vec<Attachment>> = Vec::with_capacity(messages.len());

            for (message, path) in messages.iter().zip(&paths) {
                let (without, attachments) = message.strip_attachments();
                stripped.push(without);
                if path.is_push() {
                    uploads.push(attachments);
                    local.push(Vec::new());
                } else {
                    uploads.push(Vec::new());
                    local.push(attachments);
                }
            }

            let entries: Vec<OutboxEntry<'_>> = stripped.iter().map(OutboxEntry::new).collect();
            let receipts = self.writer.write(tx, &entries)?;

            for (message, receipt) in messages.iter().zip(&receipts) {
                record_story_sends(tx, message, receipt.message_id)?;
            }

            let graph = UploadDependencyGraph::build(tx, &uploads)?;
            for (index, (message, receipt)) in messages.iter().zip(&receipts).enumerate() {
                let body = message.body.as_deref();
                if paths[index].is_push() {
                    graph.associate(tx, index, receipt.message_id, message.story_type, body)?;
                } else {
                    stage_local(tx, &local[index], receipt.message_id, message.story_type, body)?;
                }
            }

            for (index, (message, receipt)) in messages.iter().zip(&receipts).enumerate() {
                plan.add_send(
                    PlannedSend::new(receipt.message_id, message.recipient.clone(), paths[index], MessageClass::Media)
                        .with_dependencies(graph.dependency_job_ids(index)),
                );
                plan.touch_thread(receipt.thread_id);
            }
            plan.add_chains(graph.into_deferred_chains());
            Ok((receipts, plan))
        })?;

        self.execute(plan)?;
        Ok(receipts)
    }

    /// Sends a message whose media was pre-uploaded. Staged rows still unowned
    /// are tied to the new message; rows an earlier send already took are
    /// copied. The send waits on the upload chains and any copy jobs.
    pub fn send_with_pre_uploaded_media(
        &self,
        message: &OutgoingMessage,
        pre_uploads: &[PreUploadResult],
        thread_hint: Option<ThreadId>,
    ) -> DispatchResult<SendReceipt> {
        if !message.attachments.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "pre-uploaded media send must not carry attachments".to_string(),
            ));
        }
        info!(
            recipient = %message.recipient.id(),
            pre_uploads = pre_uploads.len(),
            "Sending media message with pre-uploads"
        );

        let path = self.classifier.classify(&message.recipient, ClassifyRequest::default());

        let (receipt, plan) = self.store.transaction(|tx| {
            let receipt = self
                .writer
                .write_one(tx, &OutboxEntry::new(message).in_thread(thread_hint))?;

            let link = pre_upload::link_original(tx, pre_uploads)?;
            tie_pre_uploads(tx, &link, message, receipt.message_id)?;

            let mut plan = DispatchPlan::new();
            plan.add_jobs(link.copy_jobs);
            plan.add_send(
                PlannedSend::new(receipt.message_id, message.recipient.clone(), path, MessageClass::Media)
                    .with_dependencies(link.dependencies),
            );
            plan.touch_thread(receipt.thread_id);
            Ok((receipt, plan))
        })?;

        self.execute(plan)?;
        Ok(receipt)
    }

    /// Sends the same pre-uploaded media to several destinations.
    ///
    /// With `overwrite_pre_upload_message_ids` the first message takes the
    /// staged rows; every other message gets copies, each with its own copy
    /// job waiting on the original upload chain.
    pub fn send_media_broadcast(
        &self,
        messages: &[OutgoingMessage],
        pre_uploads: &[PreUploadResult],
        overwrite_pre_upload_message_ids: bool,
    ) -> DispatchResult<Vec<SendReceipt>> {
        if messages.is_empty() {
            return Err(DispatchError::InvalidRequest("no messages to broadcast".to_string()));
        }
        if messages.iter().any(|m| !m.attachments.is_empty()) {
            return Err(DispatchError::InvalidRequest(
                "broadcast messages must not carry attachments".to_string(),
            ));
        }
        info!(
            count = messages.len(),
            pre_uploads = pre_uploads.len(),
            overwrite = overwrite_pre_upload_message_ids,
            "Sending media broadcast"
        );

        let paths = self.classify_all(messages);

        let (receipts, plan) = self.store.transaction(|tx| {
            let mut plan = DispatchPlan::new();
            let mut receipts = Vec::with_capacity(messages.len());

            for (index, message) in messages.iter().enumerate() {
                let receipt = self.writer.write_one(tx, &OutboxEntry::new(message))?;

                let link = if index == 0 && overwrite_pre_upload_message_ids {
                    pre_upload::link_original(tx, pre_uploads)?
                } else {
                    pre_upload::link_copies(tx, pre_uploads)?
                };
                tie_pre_uploads(tx, &link, message, receipt.message_id)?;
                record_story_sends(tx, message, receipt.message_id)?;

                plan.add_jobs(link.copy_jobs);
                plan.add_send(
                    PlannedSend::new(receipt.message_id, message.recipient.clone(), paths[index], MessageClass::Media)
                        .with_dependencies(link.dependencies),
                );
                plan.touch_thread(receipt.thread_id);
                receipts.push(receipt);
            }
            Ok((receipts, plan))
        })?;

        self.execute(plan)?;
        Ok(receipts)
    }

    /// Stages an attachment and starts its upload before the message exists.
    ///
    /// Returns `None` when the destination is a local self-send, which never
    /// uploads, and when the upload chain could not be submitted. In the latter
    /// case the staged row is removed again.
    pub fn pre_upload_attachment(
        &self,
        attachment: &Attachment,
        recipient: Option<&Recipient>,
        media: MediaRef,
    ) -> DispatchResult<Option<PreUploadResult>> {
        if recipient.is_some_and(|r| self.classifier.is_local_self_send(r)) {
            debug!("Skipping pre-upload for local self-send");
            return Ok(None);
        }
        info!(recipient = ?recipient.map(|r| r.id().0), "Pre-uploading attachment");

        let (result, chain) = self
            .store
            .transaction(|tx| pre_upload::stage(tx, attachment, media))?;

        let mut plan = DispatchPlan::new();
        plan.add_chains([chain]);
        if let Err(e) = self.execute(plan) {
            error!(attachment_id = %result.attachment_id(), error = %e, "Failed to start pre-upload, discarding staged row");
            self.store
                .transaction(|tx| tx.delete_unowned_attachment(result.attachment_id()))?;
            return Ok(None);
        }
        Ok(Some(result))
    }

    // ========================================================================
    // Reactions and remote delete
    // ========================================================================

    /// Adds this account's reaction and sends it.
    pub fn send_new_reaction(&self, message_id: MessageId, emoji: &str) -> DispatchResult<()> {
        let now = Utc::now();
        let reaction = Reaction {
            emoji: emoji.to_string(),
            author: self.classifier.account().self_id(),
            sent_at: now,
            received_at: now,
        };

        let target = self.store.transaction(|tx| {
            let Some(recipient) = conversation_recipient(tx, message_id)? else {
                return Ok(None);
            };
            tx.add_reaction(message_id, &reaction)?;
            Ok(Some(recipient))
        })?;

        self.submit_reaction(message_id, reaction, false, target)
    }

    /// Removes a reaction and sends the removal.
    pub fn send_reaction_removal(&self, message_id: MessageId, reaction: &Reaction) -> DispatchResult<()> {
        let target = self.store.transaction(|tx| {
            let Some(recipient) = conversation_recipient(tx, message_id)? else {
                return Ok(None);
            };
            tx.remove_reaction(message_id, reaction.author)?;
            Ok(Some(recipient))
        })?;

        self.submit_reaction(message_id, reaction.clone(), true, target)
    }

    fn submit_reaction(
        &self,
        message_id: MessageId,
        reaction: Reaction,
        remove: bool,
        target: Option<Recipient>,
    ) -> DispatchResult<()> {
        let Some(recipient) = target else {
            warn!(message_id = %message_id, remove, "Reaction target not found, ignoring");
            return Ok(());
        };

        let mut plan = DispatchPlan::new();
        plan.add_job(
            DeferredJob::new(Job::new(JobKind::ReactionSend {
                message_id,
                reaction,
                remove,
            }))
            .keyed(recipient.queue_key()),
        );
        self.execute(plan)
    }

    /// Deletes a sent message for everyone.
    pub fn send_remote_delete(&self, message_id: MessageId) -> DispatchResult<()> {
        let target = self.store.transaction(|tx| {
            let Some(recipient) = conversation_recipient(tx, message_id)? else {
                return Ok(None);
            };
            tx.mark_remote_deleted(message_id)?;
            tx.mark_sending(message_id)?;
            Ok(Some(recipient))
        })?;

        let Some(recipient) = target else {
            warn!(message_id = %message_id, "Remote delete target not found, ignoring");
            return Ok(());
        };

        let mut plan = DispatchPlan::new();
        plan.add_job(
            DeferredJob::new(Job::new(JobKind::RemoteDeleteSend { message_id }))
                .keyed(recipient.queue_key()),
        );
        self.execute(plan)
    }

    // ========================================================================
    // Resends
    // ========================================================================

    /// Re-submits the send job for an existing row. Never writes a new row.
    pub fn resend(&self, message_id: MessageId) -> DispatchResult<()> {
        let Some(stored) = self.store.transaction(|tx| tx.outgoing_message(message_id))? else {
            warn!(message_id = %message_id, "Resend target not found, ignoring");
            return Ok(());
        };

        let path = self.classifier.classify(
            &stored.recipient,
            ClassifyRequest {
                force_legacy: stored.force_legacy,
                key_exchange: stored.key_exchange && stored.class == MessageClass::Text,
            },
        );
        info!(message_id = %message_id, path = ?path, "Resending message");

        let mut plan = DispatchPlan::new();
        plan.add_send(PlannedSend::new(message_id, stored.recipient, path, stored.class));
        self.execute(plan)
    }

    /// Resends a group message, optionally to a subset of members.
    pub fn resend_group_message(&self, message_id: MessageId, filter: &[RecipientId]) -> DispatchResult<()> {
        let Some(stored) = self.store.transaction(|tx| tx.outgoing_message(message_id))? else {
            warn!(message_id = %message_id, "Group resend target not found, ignoring");
            return Ok(());
        };
        if !stored.recipient.is_group() {
            return Err(DispatchError::InvalidRequest(format!(
                "message {} is not a group message",
                message_id
            )));
        }

        let mut plan = DispatchPlan::new();
        plan.add_send(
            PlannedSend::new(message_id, stored.recipient, PathKind::PushGroup, stored.class)
                .with_filter(filter.to_vec()),
        );
        self.execute(plan)
    }

    /// Resends a story to a distribution list, optionally to a subset of members.
    pub fn resend_distribution_list(&self, message_id: MessageId, filter: &[RecipientId]) -> DispatchResult<()> {
        let Some(stored) = self.store.transaction(|tx| tx.outgoing_message(message_id))? else {
            warn!(message_id = %message_id, "Story resend target not found, ignoring");
            return Ok(());
        };
        if !stored.recipient.is_distribution_list() || !stored.story_type.is_story() {
            return Err(DispatchError::InvalidRequest(format!(
                "message {} is not a story",
                message_id
            )));
        }

        let mut plan = DispatchPlan::new();
        plan.add_send(
            PlannedSend::new(message_id, stored.recipient, PathKind::PushDistributionList, stored.class)
                .with_filter(filter.to_vec()),
        );
        self.execute(plan)
    }

    // ========================================================================
    // Profile key
    // ========================================================================

    /// Shares the profile key with a 1:1 or group thread.
    ///
    /// Returns false when the thread is missing or of another kind.
    pub fn send_profile_key(&self, thread_id: ThreadId) -> DispatchResult<bool> {
        let recipient = self.store.transaction(|tx| tx.thread_recipient(thread_id))?;
        match recipient {
            Some(Recipient::Individual { .. }) | Some(Recipient::PushGroup { .. }) => {
                let job = Job::new(JobKind::ProfileKeySend { thread_id });
                if let Err(e) = self.collaborators.scheduler.submit(job, &[], None) {
                    error!(thread_id = %thread_id, error = %e, "Failed to submit profile key send");
                    return Err(e);
                }
                debug!(thread_id = %thread_id, "Submitted profile key send");
                Ok(true)
            }
            _ => {
                debug!(thread_id = %thread_id, "Thread does not take profile keys, skipping");
                Ok(false)
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn classify_all(&self, messages: &[OutgoingMessage]) -> Vec<PathKind> {
        messages
            .iter()
            .map(|m| self.classifier.classify(&m.recipient, ClassifyRequest::default()))
            .collect()
    }

    fn execute(&self, plan: DispatchPlan) -> DispatchResult<()> {
        plan.execute(self.store.as_ref(), &self.collaborators)
    }
}

/// Attachments on paths that never upload: inserted and tied to the message
/// directly.
fn stage_local(
    tx: &dyn StoreTransaction,
    attachments: &[Attachment],
    message_id: MessageId,
    story_type: StoryType,
    body: Option<&str>,
) -> DispatchResult<()> {
    ensure_story_media(story_type, !attachments.is_empty(), message_id)?;
    let mut ids = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        ids.push(tx.insert_attachment_for_pre_upload(attachment)?);
    }
    associate_with_caption(tx, &ids, message_id, story_type, body)
}

fn tie_pre_uploads(
    tx: &dyn StoreTransaction,
    link: &PreUploadLink,
    message: &OutgoingMessage,
    message_id: MessageId,
) -> DispatchResult<()> {
    associate_with_caption(
        tx,
        &link.attachment_ids,
        message_id,
        message.story_type,
        message.body.as_deref(),
    )
}

/// Records who a distribution-list story went to.
fn record_story_sends(
    tx: &dyn StoreTransaction,
    message: &OutgoingMessage,
    message_id: MessageId,
) -> DispatchResult<()> {
    if let Recipient::DistributionList { list_id, .. } = &message.recipient {
        let members = tx.distribution_list_members(*list_id)?;
        tx.insert_story_sends(message_id, &members, message.sent_at, message.story_type.allows_replies())?;
        debug!(message_id = %message_id, members = members.len(), "Recorded story sends");
    }
    Ok(())
}

/// The recipient whose conversation holds `message_id`.
fn conversation_recipient(
    tx: &dyn StoreTransaction,
    message_id: MessageId,
) -> DispatchResult<Option<Recipient>> {
    let Some(message) = tx.outgoing_message(message_id)? else {
        return Ok(None);
    };
    Ok(Some(
        tx.thread_recipient(message.thread_id)?
            .unwrap_or(message.recipient),
    ))
}
