//! # Outbox Dispatch
//!
//! Outbound message dispatch: decides how a message leaves the device, writes a
//! durable outbox row, builds the attachment upload graph, and hands ordered
//! jobs to an external execution engine.
//!
//! ## Non-negotiable Principles
//!
//! - **The store commits first** - Rows for a whole batch commit in one transaction or not at all
//! - **Jobs follow commit** - Nothing is submitted while a transaction is open
//! - **Queue keys order groups** - Sends to one group or list never overtake each other
//! - **Resend never rewrites** - Resends re-submit jobs for the existing row
//!
//! ## Architecture
//!
//! ```text
//! SEND:
//!   classify → [ outbox rows → upload graph → plan ] → commit → execute plan
//!
//! EXECUTE:
//!   upload chains → copy jobs → send jobs | self-send → "message sent"
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use outbox_dispatch::{
//!     AccountState, Collaborators, DispatchConfig, MessageSender, OutgoingMessage,
//!     Recipient, RecordingExpirationManager, RecordingScheduler, RecordingSink,
//!     RegisteredState, SqliteStore, StaticDiscovery,
//! };
//! use outbox_dispatch::types::RecipientId;
//!
//! let scheduler = Arc::new(RecordingScheduler::new());
//! let events = Arc::new(RecordingSink::new());
//! let sender = MessageSender::new(
//!     Arc::new(SqliteStore::in_memory().unwrap()),
//!     Arc::new(AccountState::registered(RecipientId(1))),
//!     Collaborators {
//!         scheduler: scheduler.clone(),
//!         discovery: Arc::new(StaticDiscovery::new()),
//!         expiration: Arc::new(RecordingExpirationManager::new()),
//!         events: events.clone(),
//!     },
//!     &DispatchConfig::default(),
//! );
//!
//! let bob = Recipient::individual(2, RegisteredState::Registered);
//! let receipt = sender
//!     .send_text(&OutgoingMessage::text(bob, "hello"), None, false)
//!     .unwrap();
//!
//! assert_eq!(sender.store().message_count().unwrap(), 1);
//! assert_eq!(scheduler.sends().len(), 1);
//! assert_eq!(events.len(), 1);
//! # let _ = receipt;
//! ```
//!
//! ## Crate Structure
//!
//! - [`sender`] - The dispatcher
//! - [`classifier`] - Delivery path decisions
//! - [`outbox`] - Outbox rows
//! - [`graph`] - Upload dependency graph
//! - [`enqueuer`] - Send job submission
//! - [`self_send`] - Local self-send fast path
//! - [`pre_upload`] - Pre-uploaded attachments
//! - [`plan`] - Post-commit side-effects
//! - [`store`] - Persistence contracts, with a SQLite implementation

pub mod classifier;
pub mod config;
pub mod enqueuer;
mod error;
pub mod events;
pub mod expiration;
pub mod graph;
pub mod jobs;
pub mod logging;
pub mod message;
pub mod outbox;
pub mod plan;
pub mod pre_upload;
pub mod recipient;
pub mod self_send;
pub mod sender;
mod sqlite;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use classifier::{ClassifyRequest, DeliveryClassifier, PathKind, RegistrationDiscovery, StaticDiscovery};
pub use config::{AccountState, DispatchConfig};
pub use error::{DispatchError, DispatchResult};
pub use events::{BroadcastSink, EventSink, MessageSent, NullSink, RecordingSink};
pub use expiration::{ExpirationManager, RecordingExpirationManager};
pub use jobs::{Job, JobChain, JobKind, JobScheduler, RecordingScheduler};
pub use message::{Attachment, MediaRef, MessageClass, OutgoingMessage, Reaction, SendReceipt, StoryType};
pub use pre_upload::PreUploadResult;
pub use recipient::{Recipient, RegisteredState};
pub use sender::{Collaborators, MessageSender};
pub use sqlite::SqliteStore;
pub use store::{OutboxStore, StoreTransaction};
