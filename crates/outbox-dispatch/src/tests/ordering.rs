//! Queue keys for groups and lists.

use std::thread;

use super::{bob, Harness};
use crate::message::OutgoingMessage;
use crate::recipient::Recipient;

#[test]
fn sends_to_one_group_share_a_queue_key() {
    let h = Harness::new();
    let group = Recipient::push_group(10);

    h.sender
        .send_text(&OutgoingMessage::text(group.clone(), "one"), None, false)
        .unwrap();
    h.sender
        .send_text(&OutgoingMessage::text(group.clone(), "two"), None, false)
        .unwrap();

    let sends = h.scheduler.sends();
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[0].queue_key, Some(group.queue_key()));
    assert_eq!(sends[0].queue_key, sends[1].queue_key);
    assert_eq!(
        sends[0].queue_key.as_ref().map(|k| k.as_str()),
        Some("RecipientId::10")
    );
}

/// Concurrent callers still land on the same queue.
#[test]
fn concurrent_group_sends_share_a_queue_key() {
    let h = Harness::new();
    let group = Recipient::push_group(10);

    thread::scope(|scope| {
        for i in 0..4 {
            let sender = &h.sender;
            let group = group.clone();
            scope.spawn(move || {
                sender
                    .send_text(&OutgoingMessage::text(group, format!("msg {i}")), None, false)
                    .unwrap();
            });
        }
    });

    let sends = h.scheduler.sends();
    assert_eq!(sends.len(), 4);
    assert!(sends.iter().all(|s| s.queue_key == Some(group.queue_key())));
    assert_eq!(h.store().message_count().unwrap(), 4);
    assert_eq!(h.store().thread_count().unwrap(), 1);
}

#[test]
fn different_groups_use_different_keys() {
    let h = Harness::new();

    h.sender
        .send_text(&OutgoingMessage::text(Recipient::push_group(10), "a"), None, false)
        .unwrap();
    h.sender
        .send_text(&OutgoingMessage::text(Recipient::push_group(11), "b"), None, false)
        .unwrap();

    let sends = h.scheduler.sends();
    assert_ne!(sends[0].queue_key, sends[1].queue_key);
}

#[test]
fn distribution_list_sends_are_keyed() {
    let h = Harness::new();
    let list = Recipient::distribution_list(12, 120);

    h.sender
        .send_stories(&[OutgoingMessage::story(
            list.clone(),
            crate::message::StoryType::TextStoryWithReplies,
            Vec::new(),
        )])
        .unwrap();

    assert_eq!(h.scheduler.sends()[0].queue_key, Some(list.queue_key()));
}

#[test]
fn individual_sends_are_unordered() {
    let h = Harness::new();

    h.sender
        .send_text(&OutgoingMessage::text(bob(), "hi"), None, false)
        .unwrap();

    assert!(h.scheduler.sends()[0].queue_key.is_none());
}
