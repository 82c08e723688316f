//! Resends never rewrite rows.

use super::{bob, Harness};
use crate::jobs::JobKind;
use crate::message::{OutgoingMessage, StoryType};
use crate::recipient::Recipient;
use crate::types::{MessageId, RecipientId};
use crate::DispatchError;

/// Resending twice submits two jobs for the same row.
#[test]
fn resend_reuses_the_existing_row() {
    let h = Harness::new();
    let receipt = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "again?"), None, false)
        .unwrap();
    h.scheduler.clear();

    h.sender.resend(receipt.message_id).unwrap();
    h.sender.resend(receipt.message_id).unwrap();

    assert_eq!(h.store().message_count().unwrap(), 1);
    let sends = h.scheduler.sends();
    assert_eq!(sends.len(), 2);
    for send in &sends {
        assert_eq!(
            send.job.kind,
            JobKind::PushTextSend {
                message_id: receipt.message_id,
                recipient_id: bob().id(),
            }
        );
    }
    assert_ne!(sends[0].job.id, sends[1].job.id);
}

#[test]
fn resend_of_missing_message_is_ignored() {
    let h = Harness::new();

    h.sender.resend(MessageId(99)).unwrap();
    h.sender.resend_group_message(MessageId(99), &[]).unwrap();
    h.sender.resend_distribution_list(MessageId(99), &[]).unwrap();

    assert!(h.scheduler.is_empty());
    assert!(h.events.is_empty());
}

#[test]
fn resend_keeps_forced_legacy() {
    let h = Harness::new();
    let receipt = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "sms"), None, true)
        .unwrap();
    h.scheduler.clear();

    h.sender.resend(receipt.message_id).unwrap();

    assert!(matches!(
        h.scheduler.sends()[0].job.kind,
        JobKind::SmsSend { .. }
    ));
}

#[test]
fn group_resend_targets_filtered_members() {
    let h = Harness::new();
    let group = Recipient::push_group(10);
    let receipt = h
        .sender
        .send_text(&OutgoingMessage::text(group.clone(), "hello all"), None, false)
        .unwrap();
    h.scheduler.clear();

    h.sender
        .resend_group_message(receipt.message_id, &[RecipientId(3)])
        .unwrap();

    let sends = h.scheduler.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(
        sends[0].job.kind,
        JobKind::PushGroupSend {
            message_id: receipt.message_id,
            recipient_id: group.id(),
            filter: vec![RecipientId(3)],
            has_dependencies: false,
        }
    );
    assert_eq!(sends[0].queue_key, Some(group.queue_key()));
    assert_eq!(h.store().message_count().unwrap(), 1);
}

#[test]
fn group_resend_rejects_direct_messages() {
    let h = Harness::new();
    let receipt = h
        .sender
        .send_text(&OutgoingMessage::text(bob(), "hi"), None, false)
        .unwrap();

    let result = h.sender.resend_group_message(receipt.message_id, &[]);

    assert!(matches!(result, Err(DispatchError::InvalidRequest(_))));
}

#[test]
fn distribution_list_resend() {
    let h = Harness::new();
    let list = Recipient::distribution_list(12, 120);
    let receipts = h
        .sender
        .send_stories(&[OutgoingMessage::story(
            list.clone(),
            StoryType::TextStoryWithoutReplies,
            Vec::new(),
        )])
        .unwrap();
    h.scheduler.clear();

    h.sender
        .resend_distribution_list(receipts[0].message_id, &[RecipientId(2)])
        .unwrap();

    let sends = h.scheduler.sends();
    assert_eq!(sends.len(), 1);
    assert!(matches!(
        &sends[0].job.kind,
        JobKind::PushDistributionListSend { filter, .. } if filter == &vec![RecipientId(2)]
    ));
    assert_eq!(sends[0].queue_key, Some(list.queue_key()));
}

#[test]
fn distribution_list_resend_rejects_group_messages() {
    let h = Harness::new();
    let receipt = h
        .sender
        .send_text(&OutgoingMessage::text(Recipient::push_group(10), "hi"), None, false)
        .unwrap();

    let result = h.sender.resend_distribution_list(receipt.message_id, &[]);

    assert!(matches!(result, Err(DispatchError::InvalidRequest(_))));
}
