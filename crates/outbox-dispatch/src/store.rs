//! Persistence interface consumed by the dispatcher.
//!
//! Every store call runs inside [`OutboxStore::transaction`]. A closure that
//! returns `Err` rolls the whole transaction back; nothing it wrote is visible
//! afterwards.

use chrono::{DateTime, Utc};

use crate::message::{Attachment, OutgoingMessage, Reaction, StoredMessage};
use crate::recipient::Recipient;
use crate::types::{
    AttachmentId, DistributionListId, DistributionType, MessageId, ReceiptKind, RecipientId,
    SyncMessageId, ThreadId,
};
use crate::DispatchResult;

/// A store that can run a closure atomically.
pub trait OutboxStore: Send + Sync {
    /// Runs `f` in one transaction. Commits on `Ok`, rolls back on `Err`.
    fn transaction<T>(
        &self,
        f: impl FnOnce(&dyn StoreTransaction) -> DispatchResult<T>,
    ) -> DispatchResult<T>;
}

/// Operations available inside a transaction.
pub trait StoreTransaction {
    // ========================================================================
    // Threads
    // ========================================================================

    /// Returns `hint` if it names an existing thread, otherwise the thread for
    /// (recipient, distribution type), creating it if needed.
    fn get_or_create_thread(
        &self,
        recipient: &Recipient,
        hint: Option<ThreadId>,
        distribution_type: DistributionType,
    ) -> DispatchResult<ThreadId>;

    fn thread_recipient(&self, thread_id: ThreadId) -> DispatchResult<Option<Recipient>>;

    /// Bumps the thread's last-activity timestamp.
    fn touch_thread(&self, thread_id: ThreadId) -> DispatchResult<()>;

    // ========================================================================
    // Recipients
    // ========================================================================

    /// Clears the recipient's pending default-timer obligation.
    ///
    /// Returns true if an obligation was pending.
    fn consume_default_timer_obligation(&self, recipient_id: RecipientId) -> DispatchResult<bool>;

    fn distribution_list_members(
        &self,
        list_id: DistributionListId,
    ) -> DispatchResult<Vec<RecipientId>>;

    // ========================================================================
    // Messages
    // ========================================================================

    /// Inserts a pending outbox row and any inline attachments.
    fn insert_outbox_message(
        &self,
        message: &OutgoingMessage,
        thread_id: ThreadId,
        force_legacy: bool,
    ) -> DispatchResult<MessageId>;

    fn outgoing_message(&self, message_id: MessageId) -> DispatchResult<Option<StoredMessage>>;

    fn message_exists(&self, message_id: MessageId) -> DispatchResult<bool>;

    fn mark_sent(&self, message_id: MessageId) -> DispatchResult<()>;

    fn mark_sending(&self, message_id: MessageId) -> DispatchResult<()>;

    fn mark_failed(&self, message_id: MessageId) -> DispatchResult<()>;

    fn mark_unidentified(&self, message_id: MessageId) -> DispatchResult<()>;

    fn mark_expire_started(&self, message_id: MessageId, at: DateTime<Utc>) -> DispatchResult<()>;

    fn mark_remote_deleted(&self, message_id: MessageId) -> DispatchResult<()>;

    /// Increments one receipt counter on the message identified by `sync_id`.
    ///
    /// Returns the number of rows updated.
    fn increment_receipt_count(
        &self,
        kind: ReceiptKind,
        sync_id: &SyncMessageId,
        at: DateTime<Utc>,
    ) -> DispatchResult<usize>;

    // ========================================================================
    // Attachments
    // ========================================================================

    /// Inserts an attachment row with no owning message.
    fn insert_attachment_for_pre_upload(&self, attachment: &Attachment)
        -> DispatchResult<AttachmentId>;

    /// Inserts a new unowned row with the same content as `source`.
    fn copy_attachment_for_pre_upload(&self, source: AttachmentId) -> DispatchResult<AttachmentId>;

    /// True when the row exists and no message owns it yet.
    fn attachment_is_unowned(&self, attachment_id: AttachmentId) -> DispatchResult<bool>;

    /// Deletes a staged row that never got an owner.
    fn delete_unowned_attachment(&self, attachment_id: AttachmentId) -> DispatchResult<()>;

    /// Ties unowned attachments to a message in one update. Fails if any row
    /// is missing or already owned.
    fn associate_attachments(
        &self,
        ids: &[AttachmentId],
        message_id: MessageId,
        is_story: bool,
    ) -> DispatchResult<()>;

    fn set_caption(&self, attachment_id: AttachmentId, caption: &str) -> DispatchResult<()>;

    // ========================================================================
    // Stories and reactions
    // ========================================================================

    fn insert_story_sends(
        &self,
        message_id: MessageId,
        members: &[RecipientId],
        sent_at: DateTime<Utc>,
        allows_replies: bool,
    ) -> DispatchResult<()>;

    fn add_reaction(&self, message_id: MessageId, reaction: &Reaction) -> DispatchResult<()>;

    fn remove_reaction(&self, message_id: MessageId, author: RecipientId) -> DispatchResult<()>;
}

/// Stages attachments for the upload graph.
pub trait AttachmentStager {
    fn stage(&self, attachment: &Attachment) -> DispatchResult<AttachmentId>;

    fn stage_copy(&self, source: AttachmentId) -> DispatchResult<AttachmentId>;
}

impl<T: StoreTransaction + ?Sized> AttachmentStager for T {
    fn stage(&self, attachment: &Attachment) -> DispatchResult<AttachmentId> {
        self.insert_attachment_for_pre_upload(attachment)
    }

    fn stage_copy(&self, source: AttachmentId) -> DispatchResult<AttachmentId> {
        self.copy_attachment_for_pre_upload(source)
    }
}
