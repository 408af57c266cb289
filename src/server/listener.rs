use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    common::data::{MessageServeEvent, ServeEvent},
    server::{messaging::MessageStubMapping, stub::StubMapping},
};

/// Observes serve outcomes. Called synchronously after the outcome was decided and recorded,
/// so implementations must not block.
pub trait ServeEventListener: Send + Sync {
    fn stub_matched(&self, _event: &ServeEvent, _stub: &StubMapping) {}

    fn request_unmatched(&self, _event: &ServeEvent) {}

    fn message_matched(&self, _event: &MessageServeEvent, _stub: &MessageStubMapping) {}

    fn message_unmatched(&self, _event: &MessageServeEvent) {}
}

#[derive(Default)]
pub struct Listeners {
    listeners: RwLock<Vec<Arc<dyn ServeEventListener>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn ServeEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn each<F: Fn(&dyn ServeEventListener)>(&self, f: F) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for listener in listeners {
            f(listener.as_ref());
        }
    }

    pub fn stub_matched(&self, event: &ServeEvent, stub: &StubMapping) {
        self.each(|l| l.stub_matched(event, stub));
    }

    pub fn request_unmatched(&self, event: &ServeEvent) {
        self.each(|l| l.request_unmatched(event));
    }

    pub fn message_matched(&self, event: &MessageServeEvent, stub: &MessageStubMapping) {
        self.each(|l| l.message_matched(event, stub));
    }

    pub fn message_unmatched(&self, event: &MessageServeEvent) {
        self.each(|l| l.message_unmatched(event));
    }
}

/// A serve outcome as sent by [`BroadcastListener`].
#[derive(Debug, Clone)]
pub enum Notification {
    StubMatched { event: ServeEvent, stub_id: Uuid },
    RequestUnmatched(ServeEvent),
    MessageMatched { event: MessageServeEvent, stub_id: Uuid },
    MessageUnmatched(MessageServeEvent),
}

/// Forwards every outcome to a tokio broadcast channel, for consumers that run on their own
/// task.
pub struct BroadcastListener {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastListener {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    fn send(&self, notification: Notification) {
        // Sending only fails when nobody is subscribed.
        if self.sender.send(notification).is_err() {
            tracing::trace!("Dropped notification without subscribers");
        }
    }
}

impl ServeEventListener for BroadcastListener {
    fn stub_matched(&self, event: &ServeEvent, stub: &StubMapping) {
        self.send(Notification::StubMatched {
            event: event.clone(),
            stub_id: stub.id,
        });
    }

    fn request_unmatched(&self, event: &ServeEvent) {
        self.send(Notification::RequestUnmatched(event.clone()));
    }

    fn message_matched(&self, event: &MessageServeEvent, stub: &MessageStubMapping) {
        self.send(Notification::MessageMatched {
            event: event.clone(),
            stub_id: stub.id,
        });
    }

    fn message_unmatched(&self, event: &MessageServeEvent) {
        self.send(Notification::MessageUnmatched(event.clone()));
    }
}
