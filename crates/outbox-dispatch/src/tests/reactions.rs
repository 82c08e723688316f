//! Reactions and remote delete.

use super::{bob, Harness, SELF_ID};
use crate::jobs::JobKind;
use crate::message::OutgoingMessage;
use crate::recipient::Recipient;
use crate::types::{MessageId, MessageStatus, RecipientId};

fn sent_to(h: &Harness, recipient: Recipient) -> MessageId {
    let receipt = h
        .sender
        .send_text(&OutgoingMessage::text(recipient, "react to me"), None, false)
        .unwrap();
    h.scheduler.clear();
    receipt.message_id
}

#[test]
fn new_reaction_is_stored_and_sent() {
    let h = Harness::new();
    let message_id = sent_to(&h, bob());

    h.sender.send_new_reaction(message_id, "👍").unwrap();

    let reactions = h.store().reactions_for(message_id).unwrap();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].emoji, "👍");
    assert_eq!(reactions[0].author, RecipientId(SELF_ID));

    let submitted = h.scheduler.submitted();
    assert_eq!(submitted.len(), 1);
    assert!(matches!(
        &submitted[0].job.kind,
        JobKind::ReactionSend { message_id: id, remove: false, .. } if *id == message_id
    ));
    assert_eq!(submitted[0].queue_key, Some(bob().queue_key()));
}

/// A newer reaction from the same author replaces the old one.
#[test]
fn reacting_again_replaces_the_reaction() {
    let h = Harness::new();
    let message_id = sent_to(&h, bob());

    h.sender.send_new_reaction(message_id, "👍").unwrap();
    h.sender.send_new_reaction(message_id, "❤️").unwrap();

    let reactions = h.store().reactions_for(message_id).unwrap();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].emoji, "❤️");
}

#[test]
fn reaction_removal_deletes_and_sends() {
    let h = Harness::new();
    let message_id = sent_to(&h, Recipient::push_group(10));
    h.sender.send_new_reaction(message_id, "🎉").unwrap();
    let reaction = h.store().reactions_for(message_id).unwrap().remove(0);
    h.scheduler.clear();

    h.sender.send_reaction_removal(message_id, &reaction).unwrap();

    assert!(h.store().reactions_for(message_id).unwrap().is_empty());
    let submitted = h.scheduler.submitted();
    assert_eq!(submitted.len(), 1);
    assert!(matches!(
        submitted[0].job.kind,
        JobKind::ReactionSend { remove: true, .. }
    ));
    assert_eq!(
        submitted[0].queue_key,
        Some(Recipient::push_group(10).queue_key())
    );
}

#[test]
fn reaction_to_missing_message_is_ignored() {
    let h = Harness::new();

    h.sender.send_new_reaction(MessageId(99), "👍").unwrap();

    assert!(h.scheduler.is_empty());
    assert!(h.store().reactions_for(MessageId(99)).unwrap().is_empty());
}

#[test]
fn remote_delete_marks_row_and_sends() {
    let h = Harness::new();
    let message_id = sent_to(&h, bob());

    h.sender.send_remote_delete(message_id).unwrap();

    let stored = h.store().message(message_id).unwrap().unwrap();
    assert!(stored.remote_deleted);
    assert_eq!(stored.status, MessageStatus::Sending);

    let submitted = h.scheduler.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].job.kind, JobKind::RemoteDeleteSend { message_id });
    assert_eq!(submitted[0].queue_key, Some(bob().queue_key()));
}

#[test]
fn remote_delete_of_missing_message_is_ignored() {
    let h = Harness::new();

    h.sender.send_remote_delete(MessageId(99)).unwrap();

    assert!(h.scheduler.is_empty());
}
