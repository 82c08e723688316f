//! Local self-send fast path.
//!
//! When the destination is this account's only device there is nobody to
//! deliver to. The row is completed in place: marked sent, receipts synthesized,
//! expiration started. Attachments still walk through compression and a local
//! mark-uploaded job so they end in the same state as uploaded ones.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::expiration::ExpirationManager;
use crate::jobs::{Job, JobChain, JobKind, JobScheduler};
use crate::message::{MessageClass, StoredMessage};
use crate::store::{OutboxStore, StoreTransaction};
use crate::types::{MessageId, ReceiptKind, SyncMessageId};
use crate::DispatchResult;

/// Completes self-sent messages without any network job.
pub struct LocalSelfSend<'a> {
    scheduler: &'a dyn JobScheduler,
    expiration: &'a dyn ExpirationManager,
}

impl<'a> LocalSelfSend<'a> {
    pub fn new(scheduler: &'a dyn JobScheduler, expiration: &'a dyn ExpirationManager) -> Self {
        Self {
            scheduler,
            expiration,
        }
    }

    /// Completes `message_id`. Runs its own transaction, so it must not be
    /// called while another transaction on `store` is open.
    ///
    /// A message that no longer exists is logged and skipped.
    pub fn complete<S>(&self, store: &S, message_id: MessageId) -> DispatchResult<()>
    where
        S: OutboxStore + ?Sized,
    {
        let completed = store.transaction(|tx| Self::complete_in(tx, message_id))?;
        let Some(message) = completed else {
            warn!(message_id = %message_id, "Self-sent message not found, skipping");
            return Ok(());
        };

        let chain = Self::local_attachment_chain(&message);
        if !chain.is_empty() {
            chain.enqueue(self.scheduler)?;
        }

        if Self::starts_expiration(&message) {
            self.expiration.schedule_deletion(
                message_id,
                message.class == MessageClass::Media,
                message.expires_in,
            );
        }

        info!(message_id = %message_id, "Completed local self-send");
        Ok(())
    }

    fn complete_in(
        tx: &dyn StoreTransaction,
        message_id: MessageId,
    ) -> DispatchResult<Option<StoredMessage>> {
        let Some(message) = tx.outgoing_message(message_id)? else {
            return Ok(None);
        };

        tx.mark_sent(message_id)?;
        tx.mark_unidentified(message_id)?;

        let now = Utc::now();
        let sync_id =
            SyncMessageId::new(message.recipient.id(), message.sent_at).for_message(message_id);
        let mut receipts = vec![ReceiptKind::Delivery, ReceiptKind::Read];
        if message.class == MessageClass::Media {
            receipts.push(ReceiptKind::Viewed);
        }
        for kind in receipts {
            let updated = tx.increment_receipt_count(kind, &sync_id, now)?;
            debug!(message_id = %message_id, receipt = ?kind, updated, "Synthesized receipt");
        }

        if Self::starts_expiration(&message) {
            tx.mark_expire_started(message_id, now)?;
        }

        Ok(Some(message))
    }

    fn starts_expiration(message: &StoredMessage) -> bool {
        !message.expires_in.is_zero() && !message.is_expiration_update
    }

    /// Compression for every attachment, then one mark-uploaded job each.
    ///
    /// Covers body attachments, link preview thumbnails and contact avatars alike.
    fn local_attachment_chain(message: &StoredMessage) -> JobChain {
        let compressions = message
            .attachments
            .iter()
            .map(|attachment| {
                Job::new(JobKind::AttachmentCompression {
                    attachment_id: attachment.id,
                })
            })
            .collect();
        let marks = message
            .attachments
            .iter()
            .map(|attachment| {
                Job::new(JobKind::AttachmentMarkUploaded {
                    message_id: message.id,
                    attachment_id: attachment.id,
                })
            })
            .collect();

        JobChain::start_all(compressions).then_all(marks)
    }
}
