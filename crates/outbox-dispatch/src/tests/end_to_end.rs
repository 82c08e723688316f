//! Single sends through every delivery path.

use std::sync::Arc;
use std::time::Duration;

use super::{bob, carol, photo, Harness};
use crate::classifier::StaticDiscovery;
use crate::config::{AccountState, DispatchConfig};
use crate::events::{BroadcastSink, MessageSent};
use crate::expiration::RecordingExpirationManager;
use crate::jobs::{JobKind, RecordingScheduler};
use crate::message::OutgoingMessage;
use crate::recipient::{Recipient, RegisteredState};
use crate::sender::{Collaborators, MessageSender};
use crate::sqlite::SqliteStore;
use crate::types::{MessageStatus, RecipientId, ThreadId};
use crate::DispatchError;

/// Registered individual: one pending row, one push job, no dependencies, no key.
#[test]
fn text_to_registered_individual() {
    let h = Harness::new();

    let receipt = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "hello"), None, false)
        .unwrap();

    assert_eq!(h.store().message_count().unwrap(), 1);
    let stored = h.store().message(receipt.message_id).unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Pending);
    assert_eq!(stored.body.as_deref(), Some("hello"));

    let submitted = h.scheduler.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        submitted[0].job.kind,
        JobKind::PushTextSend {
            message_id: receipt.message_id,
            recipient_id: bob().id(),
        }
    );
    assert!(submitted[0].predecessors.is_empty());
    assert!(submitted[0].queue_key.is_none());
    assert_eq!(h.events.len(), 1);
}

/// Unregistered individual: legacy job instead of push.
#[test]
fn text_to_unregistered_individual_uses_legacy() {
    let h = Harness::new();

    let receipt = h
        .sender
        .send_text(&OutgoingMessage::text(carol(), "hello"), None, false)
        .unwrap();

    assert_eq!(h.store().message_count().unwrap(), 1);
    let sends = h.scheduler.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(
        sends[0].job.kind,
        JobKind::SmsSend {
            message_id: receipt.message_id,
            recipient_id: carol().id(),
        }
    );
}

#[test]
fn unknown_registration_is_refreshed() {
    let h = Harness::new();
    let erin = Recipient::individual(5, RegisteredState::Unknown);
    h.discovery.set(RecipientId(5), RegisteredState::Registered);

    h.sender
        .send_text(&OutgoingMessage::text(erin, "hi"), None, false)
        .unwrap();

    assert_eq!(h.discovery.calls(), 1);
    assert!(matches!(
        h.scheduler.sends()[0].job.kind,
        JobKind::PushTextSend { .. }
    ));
}

#[test]
fn discovery_failure_is_not_propagated() {
    let h = Harness::new();
    h.discovery.set_failing(true);

    let result = h.sender.send_text(
        &OutgoingMessage::text(Recipient::individual(5, RegisteredState::Unknown), "hi"),
        None,
        false,
    );

    assert!(result.is_ok());
    assert!(matches!(
        h.scheduler.sends()[0].job.kind,
        JobKind::SmsSend { .. }
    ));
}

#[test]
fn forced_legacy_is_remembered_on_the_row() {
    let h = Harness::new();

    let receipt = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "sms please"), None, true)
        .unwrap();

    assert!(h.store().message(receipt.message_id).unwrap().unwrap().force_legacy);
    assert!(matches!(
        h.scheduler.sends()[0].job.kind,
        JobKind::SmsSend { .. }
    ));
}

#[test]
fn media_to_registered_individual_waits_on_uploads() {
    let h = Harness::new();
    let message = OutgoingMessage::media(bob(), Some("look".to_string()), vec![photo("a"), photo("b")]);

    let receipt = h.sender.send_media(&message, None, false).unwrap();

    assert_eq!(h.scheduler.chain_count(), 2);
    let uploads: Vec<_> = h
        .scheduler
        .submitted()
        .into_iter()
        .filter(|s| matches!(s.job.kind, JobKind::AttachmentUpload { .. }))
        .map(|s| s.job.id)
        .collect();
    assert_eq!(uploads.len(), 2);

    let sends = h.scheduler.sends();
    assert_eq!(sends.len(), 1);
    assert!(matches!(sends[0].job.kind, JobKind::PushMediaSend { .. }));
    assert_eq!(sends[0].predecessors, uploads);

    let attachments = h.store().attachments_for(receipt.message_id).unwrap();
    assert_eq!(attachments.len(), 2);
    assert!(attachments
        .iter()
        .all(|a| a.caption.as_deref() == Some("look")));
    assert_eq!(h.store().unowned_attachment_count().unwrap(), 0);
}

#[test]
fn media_over_legacy_skips_the_upload_graph() {
    let h = Harness::new();
    let message = OutgoingMessage::media(carol(), None, vec![photo("a")]);

    let receipt = h.sender.send_media(&message, None, false).unwrap();

    assert_eq!(h.scheduler.chain_count(), 0);
    let submitted = h.scheduler.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        submitted[0].job.kind,
        JobKind::MmsSend {
            message_id: receipt.message_id
        }
    );
    assert!(submitted[0].predecessors.is_empty());
    assert_eq!(h.store().attachments_for(receipt.message_id).unwrap().len(), 1);
}

#[test]
fn wrong_message_class_is_rejected() {
    let h = Harness::new();
    let media = OutgoingMessage::media(bob(), None, vec![photo("a")]);
    let text = OutgoingMessage::text(bob(), "x");

    assert!(matches!(
        h.sender.send_text(&media, None, false),
        Err(DispatchError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.sender.send_media(&text, None, false),
        Err(DispatchError::InvalidRequest(_))
    ));
    assert_eq!(h.store().message_count().unwrap(), 0);
    assert!(h.scheduler.is_empty());
}

#[test]
fn sends_reuse_the_recipient_thread() {
    let h = Harness::new();

    let first = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "one"), None, false)
        .unwrap();
    let second = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "two"), Some(first.thread_id), false)
        .unwrap();
    let third = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "three"), Some(ThreadId(999)), false)
        .unwrap();

    assert_eq!(first.thread_id, second.thread_id);
    assert_eq!(first.thread_id, third.thread_id);
    assert_eq!(h.store().thread_count().unwrap(), 1);
    assert!(h.store().thread_updated_at(first.thread_id).unwrap().is_some());
}

#[test]
fn universal_timer_is_stamped_on_first_message() {
    let h = Harness::with_config(DispatchConfig {
        universal_expire_timer_secs: 3600,
        ..DispatchConfig::default()
    });
    h.store().upsert_recipient(&bob()).unwrap();
    h.store().set_default_timer_pending(bob().id()).unwrap();

    let first = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "one"), None, false)
        .unwrap();
    let second = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "two"), None, false)
        .unwrap();

    let first = h.store().message(first.message_id).unwrap().unwrap();
    let second = h.store().message(second.message_id).unwrap().unwrap();
    assert_eq!(first.expires_in, Duration::from_secs(3600));
    assert!(second.expires_in.is_zero());
}

/// A failed post-commit submission marks the row failed and is returned.
#[test]
fn failed_submission_marks_message_failed() {
    let h = Harness::new();
    h.scheduler.set_failing(true);

    let result = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "lost"), None, false);

    assert!(matches!(result, Err(DispatchError::JobSubmission(_))));
    assert_eq!(h.store().message_count().unwrap(), 1);
    let stored = h.store().message(crate::types::MessageId(1)).unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Failed);
    assert!(h.events.is_empty());
}

/// A send never goes out ahead of uploads that were never submitted.
#[test]
fn lost_upload_chain_fails_the_media_send() {
    let h = Harness::new();
    h.scheduler
        .reject_where(|kind| matches!(kind, JobKind::AttachmentCompression { .. }));

    let result = h
        .sender
        .send_media(&OutgoingMessage::media(bob(), None, vec![photo("a")]), None, false);

    assert!(matches!(result, Err(DispatchError::JobSubmission(_))));
    assert!(h.scheduler.sends().is_empty());
    let stored = h.store().message(crate::types::MessageId(1)).unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Failed);
    assert!(h.events.is_empty());
}

#[test]
fn profile_key_goes_to_individual_and_group_threads_only() {
    let h = Harness::new();
    let direct = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "hi"), None, false)
        .unwrap();
    let story = h
        .sender
        .send_stories(&[OutgoingMessage::story(
            Recipient::distribution_list(12, 120),
            crate::message::StoryType::TextStoryWithReplies,
            Vec::new(),
        )])
        .unwrap();
    h.scheduler.clear();

    assert!(h.sender.send_profile_key(direct.thread_id).unwrap());
    assert!(!h.sender.send_profile_key(story[0].thread_id).unwrap());
    assert!(!h.sender.send_profile_key(ThreadId(999)).unwrap());

    let submitted = h.scheduler.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        submitted[0].job.kind,
        JobKind::ProfileKeySend {
            thread_id: direct.thread_id
        }
    );
}

#[test]
fn broadcast_sink_signals_subscribers() {
    let events = Arc::new(BroadcastSink::new(8));
    let mut rx = events.subscribe();
    let sender = MessageSender::new(
        Arc::new(SqliteStore::in_memory().unwrap()),
        Arc::new(AccountState::registered(RecipientId(1))),
        Collaborators {
            scheduler: Arc::new(RecordingScheduler::new()),
            discovery: Arc::new(StaticDiscovery::new()),
            expiration: Arc::new(RecordingExpirationManager::new()),
            events: events.clone(),
        },
        &DispatchConfig::default(),
    );

    sender
        .send_text(&OutgoingMessage::text(bob(), "ping"), None, false)
        .unwrap();

    assert_eq!(rx.try_recv().unwrap(), MessageSent);
}
