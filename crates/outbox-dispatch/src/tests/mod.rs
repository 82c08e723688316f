//! Integration tests for the dispatcher.
//!
//! - `end_to_end.rs`  - Single sends through every delivery path
//! - `atomicity.rs`   - All-or-nothing batches, nothing submitted on rollback
//! - `stories.rs`     - Story batches, missing media, upload deduplication
//! - `self_send.rs`   - Local self-send fast path
//! - `ordering.rs`    - Queue keys for groups and lists
//! - `pre_upload.rs`  - Pre-uploads and media broadcasts
//! - `resend.rs`      - Resends never rewrite rows
//! - `reactions.rs`   - Reactions and remote delete

mod atomicity;
mod end_to_end;
mod ordering;
mod reactions;
mod resend;

use std::sync::Arc;

use crate::classifier::StaticDiscovery;
use crate::config::{AccountState, DispatchConfig};
use crate::events::RecordingSink;
use crate::expiration::RecordingExpirationManager;
use crate::jobs::RecordingScheduler;
use crate::message::Attachment;
use crate::recipient::{Recipient, RegisteredState};
use crate::sender::{Collaborators, MessageSender};
use crate::sqlite::SqliteStore;
use crate::types::RecipientId;

/// Recipient id of the local account.
pub(crate) const SELF_ID: i64 = 1;

/// A dispatcher over an in-memory store with recording collaborators.
pub(crate) struct Harness {
    pub sender: MessageSender<SqliteStore>,
    pub scheduler: Arc<RecordingScheduler>,
    pub discovery: Arc<StaticDiscovery>,
    pub expiration: Arc<RecordingExpirationManager>,
    pub events: Arc<RecordingSink>,
    pub account: Arc<AccountState>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        let scheduler = Arc::new(RecordingScheduler::new());
        let discovery = Arc::new(StaticDiscovery::new());
        let expiration = Arc::new(RecordingExpirationManager::new());
        let events = Arc::new(RecordingSink::new());
        let account = Arc::new(AccountState::registered(RecipientId(SELF_ID)));

        let sender = MessageSender::new(
            Arc::new(SqliteStore::in_memory().unwrap()),
            account.clone(),
            Collaborators {
                scheduler: scheduler.clone(),
                discovery: discovery.clone(),
                expiration: expiration.clone(),
                events: events.clone(),
            },
            &config,
        );

        Self {
            sender,
            scheduler,
            discovery,
            expiration,
            events,
            account,
        }
    }

    pub fn store(&self) -> &SqliteStore {
        self.sender.store()
    }
}

pub(crate) fn me() -> Recipient {
    Recipient::local_account(SELF_ID)
}

pub(crate) fn bob() -> Recipient {
    Recipient::individual(2, RegisteredState::Registered)
}

pub(crate) fn carol() -> Recipient {
    Recipient::individual(3, RegisteredState::NotRegistered)
}

pub(crate) fn dave() -> Recipient {
    Recipient::individual(4, RegisteredState::Registered)
}

pub(crate) fn photo(digest: &str) -> Attachment {
    Attachment::new(format!("content://media/{digest}"), "image/jpeg", 4096).with_digest(digest)
}
