//! All-or-nothing batches, nothing submitted on rollback.

use super::{bob, photo, Harness};
use crate::message::{MediaRef, OutgoingMessage, StoryType};
use crate::pre_upload::PreUploadResult;
use crate::recipient::Recipient;
use crate::types::{AttachmentId, JobId};
use crate::DispatchError;

/// A failing insert halfway through a batch leaves no trace.
#[test]
fn failed_insert_rolls_back_the_whole_batch() {
    let h = Harness::new();
    h.store().fail_inserts_with_body("poison").unwrap();

    let batch = vec![
        OutgoingMessage::story(Recipient::push_group(10), StoryType::StoryWithReplies, vec![photo("a")]),
        OutgoingMessage::story(Recipient::push_group(11), StoryType::StoryWithReplies, vec![photo("a")])
            .with_body("poison"),
    ];

    let result = h.sender.send_stories(&batch);

    assert!(matches!(result, Err(DispatchError::Sqlite(_))));
    assert_eq!(h.store().message_count().unwrap(), 0);
    assert_eq!(h.store().attachment_count().unwrap(), 0);
    assert_eq!(h.store().thread_count().unwrap(), 0);
    assert!(h.scheduler.is_empty());
    assert_eq!(h.scheduler.chain_count(), 0);
    assert!(h.events.is_empty());
}

#[test]
fn missing_media_rolls_back_earlier_stories() {
    let h = Harness::new();
    let batch = vec![
        OutgoingMessage::story(Recipient::push_group(10), StoryType::StoryWithReplies, vec![photo("a")]),
        OutgoingMessage::story(Recipient::push_group(11), StoryType::StoryWithoutReplies, Vec::new()),
    ];

    let result = h.sender.send_stories(&batch);

    assert!(matches!(result, Err(DispatchError::MissingAttachment(_))));
    assert_eq!(h.store().message_count().unwrap(), 0);
    assert_eq!(h.store().attachment_count().unwrap(), 0);
    assert!(h.scheduler.is_empty());
    assert!(h.events.is_empty());
}

#[test]
fn failed_single_send_writes_nothing() {
    let h = Harness::new();
    h.store().fail_inserts_with_body("poison").unwrap();

    let result = h
        .sender
        .send_media(&OutgoingMessage::media(bob(), Some("poison".to_string()), vec![photo("a")]), None, false);

    assert!(result.is_err());
    assert_eq!(h.store().message_count().unwrap(), 0);
    assert_eq!(h.store().attachment_count().unwrap(), 0);
    assert!(h.scheduler.is_empty());
}

/// A broadcast referencing a pre-upload row that does not exist aborts before
/// any row commits.
#[test]
fn broadcast_with_unknown_pre_upload_rolls_back() {
    let h = Harness::new();
    let bogus = PreUploadResult::new(
        MediaRef::new("content://gone"),
        AttachmentId(404),
        vec![JobId::new()],
    );
    let batch = vec![
        OutgoingMessage::media(bob(), None, Vec::new()),
        OutgoingMessage::media(Recipient::push_group(10), None, Vec::new()),
    ];

    let result = h.sender.send_media_broadcast(&batch, &[bogus], false);

    assert!(matches!(result, Err(DispatchError::Persistence(_))));
    assert_eq!(h.store().message_count().unwrap(), 0);
    assert_eq!(h.store().attachment_count().unwrap(), 0);
    assert!(h.scheduler.is_empty());
    assert!(h.events.is_empty());
}

#[test]
fn empty_broadcast_is_rejected() {
    let h = Harness::new();
    let result = h.sender.send_media_broadcast(&[], &[], true);
    assert!(matches!(result, Err(DispatchError::InvalidRequest(_))));
}
