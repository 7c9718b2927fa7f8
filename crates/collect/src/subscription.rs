//! Listener registration and event delivery.
//!
//! Every collection owns a [`SubscriptionManager`]. Listeners are called
//! synchronously in registration order. Events raised while the manager is
//! already delivering are queued and delivered afterwards, so each listener
//! sees one coherent sequence.

use crate::change_set::ChangeSet;
use crate::event::CollectionEvent;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback for element events.
pub type EventListener<T> = Rc<dyn Fn(&CollectionEvent<T>)>;

/// Callback for per-transaction change sets.
pub type BatchListener<T> = Rc<dyn Fn(&ChangeSet<T>)>;

/// A registration that is cancelled when dropped.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` when dropped.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Creates a subscription with nothing to cancel.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Returns whether this subscription is still registered.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Cancels the registration now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    /// Keeps the registration alive for as long as its target lives.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Manages listeners of one collection.
pub struct SubscriptionManager<T> {
    /// Element listeners in registration order
    listeners: RefCell<Vec<(SubscriptionId, EventListener<T>)>>,
    /// Batch listeners in registration order
    batch_listeners: RefCell<Vec<(SubscriptionId, BatchListener<T>)>>,
    /// Events waiting for delivery
    queue: RefCell<VecDeque<CollectionEvent<T>>>,
    /// Whether delivery is in progress
    delivering: Cell<bool>,
    /// Events of the open transaction, for batch listeners
    pending: RefCell<ChangeSet<T>>,
    /// Next subscription ID to assign
    next_id: Cell<SubscriptionId>,
}

impl<T: Clone + 'static> Default for SubscriptionManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> SubscriptionManager<T> {
    /// Creates a new subscription manager.
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
            batch_listeners: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            delivering: Cell::new(false),
            pending: RefCell::new(ChangeSet::new()),
            next_id: Cell::new(1),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    /// Registers an element listener.
    pub fn subscribe(self: &Rc<Self>, listener: EventListener<T>) -> Subscription {
        let id = self.next_id();
        self.listeners.borrow_mut().push((id, listener));
        let manager = Rc::downgrade(self);
        Subscription::new(move || {
            if let Some(manager) = manager.upgrade() {
                manager.unsubscribe(id);
            }
        })
    }

    /// Registers a listener for whole-transaction change sets.
    pub fn subscribe_batched(self: &Rc<Self>, listener: BatchListener<T>) -> Subscription {
        let id = self.next_id();
        self.batch_listeners.borrow_mut().push((id, listener));
        let manager = Rc::downgrade(self);
        Subscription::new(move || {
            if let Some(manager) = manager.upgrade() {
                manager.unsubscribe(id);
            }
        })
    }

    /// Unsubscribes by ID.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        if listeners.len() != before {
            return true;
        }
        drop(listeners);
        let mut batch = self.batch_listeners.borrow_mut();
        let before = batch.len();
        batch.retain(|(sub, _)| *sub != id);
        batch.len() != before
    }

    /// Returns the number of registered listeners of both kinds.
    #[inline]
    pub fn len(&self) -> usize {
        self.listeners.borrow().len() + self.batch_listeners.borrow().len()
    }

    /// Returns true if there are no listeners.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers an event to every element listener.
    pub fn notify(&self, event: CollectionEvent<T>) {
        if !self.batch_listeners.borrow().is_empty() {
            self.pending.borrow_mut().push(event.clone());
        }
        self.queue.borrow_mut().push_back(event);
        if self.delivering.replace(true) {
            return;
        }
        let _reset = DeliveryReset(&self.delivering);
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            // Snapshot so listeners may (un)subscribe while being called
            let listeners: Vec<EventListener<T>> = self
                .listeners
                .borrow()
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect();
            for listener in listeners {
                listener(&event);
            }
        }
    }

    /// Delivers every event gathered since the last flush to the batch
    /// listeners. Called when the outermost write transaction closes.
    pub fn flush(&self) {
        let changes = std::mem::take(&mut *self.pending.borrow_mut());
        if changes.is_empty() {
            return;
        }
        let listeners: Vec<BatchListener<T>> = self
            .batch_listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&changes);
        }
    }
}

/// Clears the delivery flag even if a listener panics.
struct DeliveryReset<'a>(&'a Cell<bool>);

impl Drop for DeliveryReset<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Cause, ElementId};

    fn event(index: usize) -> CollectionEvent<usize> {
        CollectionEvent::added(ElementId::new(index as u32, 0), index, index, Cause::new())
    }

    #[test]
    fn test_listeners_called_in_registration_order() {
        let manager = Rc::new(SubscriptionManager::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut subs = Vec::new();
        for name in ["first", "second", "third"] {
            let log = log.clone();
            subs.push(manager.subscribe(Rc::new(move |_: &CollectionEvent<usize>| {
                log.borrow_mut().push(name)
            })));
        }
        manager.notify(event(0));
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let manager = Rc::new(SubscriptionManager::new());
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let sub = manager.subscribe(Rc::new(move |_: &CollectionEvent<usize>| {
            counter.set(counter.get() + 1)
        }));
        manager.notify(event(0));
        drop(sub);
        manager.notify(event(1));
        assert_eq!(count.get(), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_detach_keeps_listener() {
        let manager = Rc::new(SubscriptionManager::new());
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        manager
            .subscribe(Rc::new(move |_: &CollectionEvent<usize>| {
                counter.set(counter.get() + 1)
            }))
            .detach();
        manager.notify(event(0));
        assert_eq!(count.get(), 1);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_nested_notify_is_queued() {
        let manager = Rc::new(SubscriptionManager::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let weak = Rc::downgrade(&manager);
        let first_log = log.clone();
        let _a = manager.subscribe(Rc::new(move |e: &CollectionEvent<usize>| {
            first_log.borrow_mut().push(("a", e.index));
            if e.index == 0 {
                if let Some(manager) = weak.upgrade() {
                    manager.notify(event(1));
                }
            }
        }));
        let second_log = log.clone();
        let _b = manager.subscribe(Rc::new(move |e: &CollectionEvent<usize>| {
            second_log.borrow_mut().push(("b", e.index));
        }));

        manager.notify(event(0));
        // Event 1 is delivered only after every listener saw event 0
        assert_eq!(*log.borrow(), vec![("a", 0), ("b", 0), ("a", 1), ("b", 1)]);
    }

    #[test]
    fn test_flush_batches_events() {
        let manager = Rc::new(SubscriptionManager::new());
        let batches = Rc::new(RefCell::new(Vec::new()));
        let sink = batches.clone();
        let _sub = manager.subscribe_batched(Rc::new(move |changes: &ChangeSet<usize>| {
            sink.borrow_mut().push(changes.len())
        }));

        manager.notify(event(0));
        manager.notify(event(1));
        assert!(batches.borrow().is_empty());
        manager.flush();
        manager.flush();
        assert_eq!(*batches.borrow(), vec![2]);
    }
}
