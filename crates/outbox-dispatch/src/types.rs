//! Identifiers and small value types shared across the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Row id of an outbox message.
    MessageId
);
row_id!(
    /// Row id of a conversation thread.
    ThreadId
);
row_id!(
    /// Row id of an attachment.
    AttachmentId
);
row_id!(
    /// Row id of a recipient (individual, group, distribution list, or self).
    RecipientId
);
row_id!(
    /// Id of a story distribution list.
    DistributionListId
);

impl RecipientId {
    /// Returns the ordering token used to serialize jobs for this recipient.
    pub fn to_queue_key(&self) -> QueueKey {
        QueueKey(format!("RecipientId::{}", self.0))
    }
}

/// Stable identifier of a submitted job (UUID string).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a job ID from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JOB::{}", self.0)
    }
}

/// Ordering token. Jobs sharing a key run strictly FIFO.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueKey(pub String);

impl QueueKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a thread is bucketed for its recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionType {
    #[default]
    Conversation,
    Broadcast,
}

impl DistributionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Broadcast => "broadcast",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "broadcast" => Self::Broadcast,
            _ => Self::Conversation,
        }
    }
}

/// Outbox message status.
///
/// Rows are born `Pending`; `Sent` and `Failed` are normally set by job
/// completion outside this crate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Pending,
    Sending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sending" => Self::Sending,
            "sent" => Self::Sent,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Receipt counters kept per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivery,
    Read,
    Viewed,
}

impl ReceiptKind {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery_receipt_count",
            Self::Read => "read_receipt_count",
            Self::Viewed => "viewed_receipt_count",
        }
    }
}

/// Identifies a message by author and sent timestamp, the way receipts do.
///
/// Several rows can share a timestamp; [`SyncMessageId::for_message`] pins the
/// id to one row when the caller already knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMessageId {
    pub recipient_id: RecipientId,
    pub sent_at: DateTime<Utc>,
    pub message_id: Option<MessageId>,
}

impl SyncMessageId {
    pub fn new(recipient_id: RecipientId, sent_at: DateTime<Utc>) -> Self {
        Self {
            recipient_id,
            sent_at,
            message_id: None,
        }
    }

    pub fn for_message(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_key_is_stable_per_recipient() {
        assert_eq!(RecipientId(7).to_queue_key(), RecipientId(7).to_queue_key());
        assert_ne!(RecipientId(7).to_queue_key(), RecipientId(8).to_queue_key());
        assert_eq!(RecipientId(7).to_queue_key().as_str(), "RecipientId::7");
    }

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
        assert!(JobId::from_string("abc").to_string().starts_with("JOB::"));
    }

    #[test]
    fn message_status_from_str() {
        assert_eq!(MessageStatus::from_str("pending"), MessageStatus::Pending);
        assert_eq!(MessageStatus::from_str("SENT"), MessageStatus::Sent);
        assert_eq!(MessageStatus::from_str("failed"), MessageStatus::Failed);
        assert_eq!(MessageStatus::from_str("sending"), MessageStatus::Sending);
        assert_eq!(MessageStatus::from_str("unknown"), MessageStatus::Pending);
    }

    #[test]
    fn distribution_type_roundtrip_names() {
        assert_eq!(
            DistributionType::from_str(DistributionType::Broadcast.as_str()),
            DistributionType::Broadcast
        );
        assert_eq!(DistributionType::default(), DistributionType::Conversation);
    }
}
