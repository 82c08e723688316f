//! Logical outgoing messages and the rows they turn into.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recipient::Recipient;
use crate::types::{
    AttachmentId, DistributionType, MessageId, MessageStatus, RecipientId, ThreadId,
};

/// Text messages travel on the SMS-style job kinds, everything else on the
/// MMS-style kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageClass {
    Text,
    Media,
}

impl MessageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Media => "media",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            _ => Self::Media,
        }
    }
}

/// Story flavour of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryType {
    #[default]
    None,
    StoryWithReplies,
    StoryWithoutReplies,
    TextStoryWithReplies,
    TextStoryWithoutReplies,
}

impl StoryType {
    pub fn is_story(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn is_text_story(&self) -> bool {
        matches!(
            self,
            Self::TextStoryWithReplies | Self::TextStoryWithoutReplies
        )
    }

    pub fn allows_replies(&self) -> bool {
        matches!(self, Self::StoryWithReplies | Self::TextStoryWithReplies)
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::None => 0,
            Self::StoryWithReplies => 1,
            Self::StoryWithoutReplies => 2,
            Self::TextStoryWithReplies => 3,
            Self::TextStoryWithoutReplies => 4,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::StoryWithReplies,
            2 => Self::StoryWithoutReplies,
            3 => Self::TextStoryWithReplies,
            4 => Self::TextStoryWithoutReplies,
            _ => Self::None,
        }
    }
}

/// Where an attachment hangs off its message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentRole {
    #[default]
    Body,
    LinkPreviewThumbnail,
    ContactAvatar,
}

impl AttachmentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Body => "body",
            Self::LinkPreviewThumbnail => "link_preview_thumbnail",
            Self::ContactAvatar => "contact_avatar",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "link_preview_thumbnail" => Self::LinkPreviewThumbnail,
            "contact_avatar" => Self::ContactAvatar,
            _ => Self::Body,
        }
    }
}

/// Dedup key for attachment payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaKey(pub String);

/// An attachment supplied by the caller, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub uri: String,
    pub content_type: String,
    pub size: u64,
    /// Content digest. When present it identifies byte-identical payloads.
    pub digest: Option<String>,
    #[serde(default)]
    pub role: AttachmentRole,
}

impl Attachment {
    pub fn new(uri: impl Into<String>, content_type: impl Into<String>, size: u64) -> Self {
        Self {
            uri: uri.into(),
            content_type: content_type.into(),
            size,
            digest: None,
            role: AttachmentRole::Body,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    pub fn with_role(mut self, role: AttachmentRole) -> Self {
        self.role = role;
        self
    }

    pub fn media_key(&self) -> MediaKey {
        match &self.digest {
            Some(digest) => MediaKey(format!("digest:{}", digest)),
            None => MediaKey(format!("uri:{}", self.uri)),
        }
    }
}

/// Caller-side handle to the media a pre-upload was made from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub uri: String,
}

impl MediaRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

/// A logical message handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub recipient: Recipient,
    pub class: MessageClass,
    pub body: Option<String>,
    pub attachments: Vec<Attachment>,
    pub expires_in: Duration,
    pub is_expiration_update: bool,
    pub key_exchange: bool,
    pub story_type: StoryType,
    pub distribution_type: DistributionType,
    pub sent_at: DateTime<Utc>,
}

impl OutgoingMessage {
    pub fn text(recipient: Recipient, body: impl Into<String>) -> Self {
        Self {
            recipient,
            class: MessageClass::Text,
            body: Some(body.into()),
            attachments: Vec::new(),
            expires_in: Duration::ZERO,
            is_expiration_update: false,
            key_exchange: false,
            story_type: StoryType::None,
            distribution_type: DistributionType::Conversation,
            sent_at: Utc::now(),
        }
    }

    pub fn media(recipient: Recipient, body: Option<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            class: MessageClass::Media,
            body,
            attachments,
            ..Self::text(recipient, String::new())
        }
    }

    pub fn story(recipient: Recipient, story_type: StoryType, attachments: Vec<Attachment>) -> Self {
        Self {
            story_type,
            distribution_type: DistributionType::Broadcast,
            ..Self::media(recipient, None, attachments)
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_expiry(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    pub fn as_expiration_update(mut self) -> Self {
        self.is_expiration_update = true;
        self
    }

    pub fn as_key_exchange(mut self) -> Self {
        self.key_exchange = true;
        self
    }

    pub fn sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = sent_at;
        self
    }

    /// Splits off the attachments so the row can be written before they are staged.
    pub fn strip_attachments(&self) -> (Self, Vec<Attachment>) {
        let mut stripped = self.clone();
        let attachments = std::mem::take(&mut stripped.attachments);
        (stripped, attachments)
    }
}

/// A reaction on an existing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub author: RecipientId,
    pub sent_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

/// Attachment row as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    pub id: AttachmentId,
    pub message_id: Option<MessageId>,
    pub uri: String,
    pub content_type: String,
    pub size: u64,
    pub digest: Option<String>,
    pub role: AttachmentRole,
    pub caption: Option<String>,
}

/// Outbox row as persisted, with its recipient resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub recipient: Recipient,
    pub class: MessageClass,
    pub body: Option<String>,
    pub status: MessageStatus,
    pub expires_in: Duration,
    pub expire_started_at: Option<DateTime<Utc>>,
    pub is_expiration_update: bool,
    pub key_exchange: bool,
    pub force_legacy: bool,
    pub story_type: StoryType,
    pub sent_at: DateTime<Utc>,
    pub unidentified: bool,
    pub remote_deleted: bool,
    pub delivery_receipt_count: i64,
    pub read_receipt_count: i64,
    pub viewed_receipt_count: i64,
    pub attachments: Vec<StoredAttachment>,
}

/// Ids handed back for a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: MessageId,
    pub thread_id: ThreadId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipient::RegisteredState;

    #[test]
    fn media_key_prefers_digest() {
        let a = Attachment::new("content://a", "image/jpeg", 10).with_digest("abc");
        let b = Attachment::new("content://b", "image/jpeg", 10).with_digest("abc");
        let c = Attachment::new("content://a", "image/jpeg", 10);
        assert_eq!(a.media_key(), b.media_key());
        assert_ne!(a.media_key(), c.media_key());
    }

    #[test]
    fn story_type_flags() {
        assert!(!StoryType::None.is_story());
        assert!(StoryType::TextStoryWithReplies.is_text_story());
        assert!(StoryType::TextStoryWithReplies.allows_replies());
        assert!(!StoryType::StoryWithoutReplies.allows_replies());
        for code in 0..5 {
            assert_eq!(StoryType::from_code(code).code(), code);
        }
    }

    #[test]
    fn strip_attachments_keeps_everything_else() {
        let message = OutgoingMessage::media(
            Recipient::individual(1, RegisteredState::Registered),
            Some("hi".to_string()),
            vec![Attachment::new("content://a", "image/png", 3)],
        );
        let (stripped, attachments) = message.strip_attachments();
        assert!(stripped.attachments.is_empty());
        assert_eq!(attachments.len(), 1);
        assert_eq!(stripped.body, message.body);
        assert_eq!(stripped.class, MessageClass::Media);
    }
}
