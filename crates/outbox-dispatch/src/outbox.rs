//! Outbox writer.
//!
//! Allocates threads and inserts pending rows for a whole batch inside the
//! caller's transaction. Any failure propagates and the caller's transaction
//! rolls the entire batch back.

use std::borrow::Cow;
use std::time::Duration;

use tracing::{debug, info};

use crate::message::{OutgoingMessage, SendReceipt};
use crate::store::StoreTransaction;
use crate::types::ThreadId;
use crate::DispatchResult;

/// One message of a batch plus how to file it.
#[derive(Debug, Clone)]
pub struct OutboxEntry<'a> {
    pub message: &'a OutgoingMessage,
    pub thread_hint: Option<ThreadId>,
    pub force_legacy: bool,
}

impl<'a> OutboxEntry<'a> {
    pub fn new(message: &'a OutgoingMessage) -> Self {
        Self {
            message,
            thread_hint: None,
            force_legacy: false,
        }
    }

    pub fn in_thread(mut self, thread_hint: Option<ThreadId>) -> Self {
        self.thread_hint = thread_hint;
        self
    }

    pub fn force_legacy(mut self, force_legacy: bool) -> Self {
        self.force_legacy = force_legacy;
        self
    }
}

/// Writes outbox rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxWriter {
    universal_timer: Option<Duration>,
}

impl OutboxWriter {
    pub fn new(universal_timer: Option<Duration>) -> Self {
        Self { universal_timer }
    }

    /// Persists every entry in order. Returns one receipt per entry.
    pub fn write(
        &self,
        tx: &dyn StoreTransaction,
        batch: &[OutboxEntry<'_>],
    ) -> DispatchResult<Vec<SendReceipt>> {
        let mut receipts = Vec::with_capacity(batch.len());
        for entry in batch {
            receipts.push(self.write_one(tx, entry)?);
        }
        debug!(count = receipts.len(), "Wrote outbox batch");
        Ok(receipts)
    }

    pub fn write_one(
        &self,
        tx: &dyn StoreTransaction,
        entry: &OutboxEntry<'_>,
    ) -> DispatchResult<SendReceipt> {
        let message = entry.message;
        let thread_id = tx.get_or_create_thread(
            &message.recipient,
            entry.thread_hint,
            message.distribution_type,
        )?;

        let message = self.apply_universal_timer(tx, message)?;
        let message_id = tx.insert_outbox_message(&message, thread_id, entry.force_legacy)?;

        Ok(SendReceipt {
            message_id,
            thread_id,
        })
    }

    /// Stamps the universal timer on a message that has no timer of its own
    /// when its recipient still owes one. The obligation is consumed here.
    fn apply_universal_timer<'m>(
        &self,
        tx: &dyn StoreTransaction,
        message: &'m OutgoingMessage,
    ) -> DispatchResult<Cow<'m, OutgoingMessage>> {
        let Some(timer) = self.universal_timer else {
            return Ok(Cow::Borrowed(message));
        };
        if !message.expires_in.is_zero() || message.is_expiration_update {
            return Ok(Cow::Borrowed(message));
        }
        if !tx.consume_default_timer_obligation(message.recipient.id())? {
            return Ok(Cow::Borrowed(message));
        }

        info!(
            recipient = %message.recipient.id(),
            timer_secs = timer.as_secs(),
            "Applying universal expire timer"
        );
        Ok(Cow::Owned(message.clone().with_expiry(timer)))
    }
}
