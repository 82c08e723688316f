//! Disappearing-message scheduling.

use std::sync::Mutex;
use std::time::Duration;

use crate::types::MessageId;

/// Deletes messages once their expiration timer runs out.
pub trait ExpirationManager: Send + Sync {
    fn schedule_deletion(&self, message_id: MessageId, is_media: bool, expires_in: Duration);
}

/// A deletion request as the manager received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledDeletion {
    pub message_id: MessageId,
    pub is_media: bool,
    pub expires_in: Duration,
}

/// Records deletion requests instead of acting on them.
#[derive(Debug, Default)]
pub struct RecordingExpirationManager {
    scheduled: Mutex<Vec<ScheduledDeletion>>,
}

impl RecordingExpirationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<ScheduledDeletion> {
        self.scheduled.lock().expect("lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.scheduled.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExpirationManager for RecordingExpirationManager {
    fn schedule_deletion(&self, message_id: MessageId, is_media: bool, expires_in: Duration) {
        self.scheduled
            .lock()
            .expect("lock poisoned")
            .push(ScheduledDeletion {
                message_id,
                is_media,
                expires_in,
            });
    }
}
