//! Event infrastructure for mirror operations.
//!
//! Background work is detached from whoever triggered it, so failures and
//! progress surface only through logs and `MirrorEvent`s published here.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Events emitted while mirroring a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MirrorEvent {
    /// A folder was created in the destination tree.
    FolderCreated {
        parent_id: String,
        folder_id: String,
        name: String,
    },
    /// A template file was copied into the destination tree.
    FileCopied {
        source_id: String,
        file_id: String,
        name: String,
    },
    /// A template file copy failed; the clone carried on.
    CopyFailed {
        source_id: String,
        name: String,
        reason: String,
    },
    /// A subtree was handed to the external executor.
    SubtreeDispatched {
        source_id: String,
        destination_id: String,
        label: String,
    },
    /// A table of contents was uploaded.
    TocPublished {
        root_id: String,
        file_id: String,
        entries: usize,
    },
    /// A fire-and-forget task finished without doing its job.
    BackgroundFailed { task: String, reason: String },
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(MirrorEvent) + Send + Sync>;

/// Event bus for publishing mirror events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(MirrorEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: MirrorEvent) {
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Emit on an optional bus.
pub(crate) fn emit(bus: &Option<Arc<EventBus>>, event: MirrorEvent) {
    if let Some(bus) = bus {
        bus.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn folder_created(name: &str) -> MirrorEvent {
        MirrorEvent::FolderCreated {
            parent_id: "p".into(),
            folder_id: "f".into(),
            name: name.into(),
        }
    }

    #[test]
    fn subscribers_receive_events() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = bus.subscribe(move |event| sink.lock().unwrap().push(event));

        bus.emit(folder_created("Element 1"));
        assert_eq!(seen.lock().unwrap().as_slice(), &[folder_created("Element 1")]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let sub = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        bus.emit(folder_created("a"));
        drop(sub);
        bus.emit(folder_created("b"));

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn events_serialize_with_camel_case_tags() {
        let event = MirrorEvent::TocPublished {
            root_id: "r".into(),
            file_id: "f".into(),
            entries: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tocPublished");
        assert_eq!(json["rootId"], "r");
        assert_eq!(json["entries"], 3);
    }
}
