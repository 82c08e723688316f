//! "Message sent" notification.
//!
//! The dispatcher emits one signal after every successful dispatch, once the
//! outbox rows are committed and the jobs handed over. The signal carries no
//! payload; listeners re-read whatever state they care about.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::broadcast;

/// The unit signal carried on a [`BroadcastSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSent;

/// Receives the "message sent" signal.
pub trait EventSink: Send + Sync {
    /// Called after a dispatch committed and its jobs were submitted.
    fn message_sent(&self);
}

/// Discards every signal.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn message_sent(&self) {}
}

/// Counts signals for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    count: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of signals received.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

impl EventSink for RecordingSink {
    fn message_sent(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

pub type MessageSentReceiver = broadcast::Receiver<MessageSent>;

/// Fans the signal out to any number of subscribers.
///
/// Sending with no live subscriber is not an error; the signal is dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<MessageSent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> MessageSentReceiver {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventSink for BroadcastSink {
    fn message_sent(&self) {
        let _ = self.tx.send(MessageSent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_counts_signals() {
        let sink = RecordingSink::new();
        assert!(sink.is_empty());
        sink.message_sent();
        sink.message_sent();
        assert_eq!(sink.len(), 2);
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn broadcast_reaches_every_subscriber() {
        let sink = BroadcastSink::new(4);
        let mut a = sink.subscribe();
        let mut b = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 2);

        sink.message_sent();

        assert_eq!(a.try_recv().unwrap(), MessageSent);
        assert_eq!(b.try_recv().unwrap(), MessageSent);
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn broadcast_without_subscribers_is_silent() {
        let sink = BroadcastSink::default();
        sink.message_sent();

        let mut late = sink.subscribe();
        assert!(late.try_recv().is_err());
    }
}
