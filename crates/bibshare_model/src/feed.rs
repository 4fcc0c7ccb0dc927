//! Publish/subscribe channels for change events.

use crate::event::ChangeEvent;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Distributes change events to subscribers.
///
/// The feed is an explicit publish/subscribe channel: every consumer of
/// entry changes — the synchronizer, an autosave writer, a UI layer — is
/// an ordinary subscriber, none of them privileged. Events are cloned to
/// each active subscriber; disconnected subscribers are dropped on the
/// next emit.
#[derive(Default)]
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    /// Creates a feed with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to all future events.
    ///
    /// The receiver should be drained regularly; an abandoned receiver is
    /// detached on the next emit.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to all subscribers.
    pub fn emit(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Emits multiple events in order.
    pub fn emit_batch(&self, events: Vec<ChangeEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Returns the number of attached subscribers.
    ///
    /// Disconnected subscribers are only detached on emit, so this may
    /// briefly overcount.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
