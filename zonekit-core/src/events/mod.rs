//! Typed, in-process publish/subscribe.
//!
//! Handlers are keyed by the event's `TypeId`. Registration changes take a
//! single coarse lock; `publish` clones the handler list under that lock
//! and invokes every handler after releasing it, so a handler may itself
//! subscribe, unsubscribe or publish without deadlocking.
//!
//! Each invocation is isolated: a handler that returns `Err` or panics is
//! logged and counted, and the remaining handlers still run.

pub mod payloads;

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::ZoneError;
use crate::isolation::isolate;
use crate::metrics::ZoneCounters;

pub use payloads::{
    FlowExecuted, PlayerEnteredZone, PlayerExitedZone, SnapshotCaptured, SnapshotRestored,
};

/// What a handler returns.
pub type HandlerResult = std::result::Result<(), ZoneError>;

type ErasedHandler = Arc<dyn Fn(&dyn Any) -> HandlerResult + Send + Sync>;

/// Token identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    handler: ErasedHandler,
}

/// Type-keyed subscriber registry.
pub struct EventBus {
    subscribers: Mutex<HashMap<TypeId, Vec<Entry>>>,
    next_id: AtomicU64,
    counters: Arc<ZoneCounters>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.subscribers.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Arc::new(ZoneCounters::new()))
    }
}

impl EventBus {
    /// Create an empty bus reporting handler faults into `counters`.
    #[must_use]
    pub fn new(counters: Arc<ZoneCounters>) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            counters,
        }
    }

    /// Register `handler` for events of type `T`.
    pub fn subscribe<T, F>(&self, handler: F) -> SubscriptionId
    where
        T: Any,
        F: Fn(&T) -> HandlerResult + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let erased: ErasedHandler = Arc::new(move |event: &dyn Any| match event.downcast_ref::<T>() {
            Some(event) => handler(event),
            None => Ok(()),
        });
        self.subscribers
            .lock()
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Entry { id, handler: erased });
        id
    }

    /// Register `handler` and get a guard that unsubscribes when dropped.
    pub fn subscribe_scoped<T, F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        T: Any,
        F: Fn(&T) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.subscribe::<T, F>(handler);
        Subscription {
            bus: Arc::downgrade(self),
            type_id: TypeId::of::<T>(),
            id,
        }
    }

    /// Remove a subscription for `T`. Returns `true` if it was registered.
    pub fn unsubscribe<T: Any>(&self, id: SubscriptionId) -> bool {
        self.unsubscribe_raw(TypeId::of::<T>(), id)
    }

    fn unsubscribe_raw(&self, type_id: TypeId, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(list) = subscribers.get_mut(&type_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|e| e.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&type_id);
        }
        removed
    }

    /// Deliver `event` to every handler registered for `T`.
    ///
    /// Returns how many handlers completed successfully. Never fails.
    pub fn publish<T: Any>(&self, event: &T) -> usize {
        let handlers: Vec<ErasedHandler> = {
            let subscribers = self.subscribers.lock();
            match subscribers.get(&TypeId::of::<T>()) {
                Some(list) => list.iter().map(|e| Arc::clone(&e.handler)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for handler in handlers {
            match isolate(|| handler(event as &dyn Any)) {
                Ok(()) => delivered += 1,
                Err(reason) => {
                    self.counters.handler_faults.fetch_add(1, Ordering::Relaxed);
                    warn!(event = type_name::<T>(), reason = %reason, "Event handler failed");
                }
            }
        }
        delivered
    }

    /// Number of handlers registered for `T`.
    #[must_use]
    pub fn subscriber_count<T: Any>(&self) -> usize {
        self.subscribers
            .lock()
            .get(&TypeId::of::<T>())
            .map_or(0, Vec::len)
    }

    /// Whether any handler is registered for `T`.
    #[must_use]
    pub fn has_subscribers<T: Any>(&self) -> bool {
        self.subscriber_count::<T>() > 0
    }

    /// Drop every subscription of every type.
    pub fn clear_all(&self) {
        self.subscribers.lock().clear();
    }
}

/// Guard returned by [`EventBus::subscribe_scoped`].
#[derive(Debug)]
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<EventBus>,
    type_id: TypeId,
    id: SubscriptionId,
}

impl Subscription {
    /// The underlying subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe_raw(self.type_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityHandle, Position};
    use std::sync::atomic::AtomicUsize;

    fn entered() -> PlayerEnteredZone {
        PlayerEnteredZone {
            player: EntityHandle::new(1, 1),
            zone_id: "arena-1".to_string(),
            position: Position::default(),
            at: chrono::Utc::now(),
        }
    }

    #[test]
    fn failing_first_subscriber_does_not_block_second() {
        let bus = EventBus::default();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_: &PlayerEnteredZone| -> HandlerResult { panic!("subscriber exploded") });
        let s = Arc::clone(&seen);
        bus.subscribe(move |e: &PlayerEnteredZone| {
            assert_eq!(e.zone_id, "arena-1");
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let delivered = bus.publish(&entered());
        assert_eq!(delivered, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(bus.counters.handler_faults.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn err_result_counts_as_fault() {
        let bus = EventBus::default();
        bus.subscribe(|_: &PlayerEnteredZone| Err(ZoneError::Host("offline".into())));
        assert_eq!(bus.publish(&entered()), 0);
    }

    #[test]
    fn events_are_routed_by_type() {
        let bus = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe(move |_: &PlayerExitedZone| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(bus.publish(&entered()), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(bus.has_subscribers::<PlayerExitedZone>());
        assert!(!bus.has_subscribers::<PlayerEnteredZone>());
    }

    #[test]
    fn unsubscribe_removes_handler_and_empty_type() {
        let bus = EventBus::default();
        let id = bus.subscribe(|_: &PlayerEnteredZone| Ok(()));
        assert_eq!(bus.subscriber_count::<PlayerEnteredZone>(), 1);
        assert!(bus.unsubscribe::<PlayerEnteredZone>(id));
        assert!(!bus.unsubscribe::<PlayerEnteredZone>(id));
        assert_eq!(bus.subscriber_count::<PlayerEnteredZone>(), 0);
        assert!(bus.subscribers.lock().is_empty());
    }

    #[test]
    fn scoped_subscription_ends_on_drop() {
        let bus = Arc::new(EventBus::default());
        {
            let _guard = bus.subscribe_scoped(|_: &PlayerEnteredZone| Ok(()));
            assert!(bus.has_subscribers::<PlayerEnteredZone>());
        }
        assert!(!bus.has_subscribers::<PlayerEnteredZone>());
    }

    #[test]
    fn handler_may_subscribe_during_publish() {
        let bus = Arc::new(EventBus::default());
        let inner = Arc::clone(&bus);
        bus.subscribe(move |_: &PlayerEnteredZone| {
            inner.subscribe(|_: &PlayerExitedZone| Ok(()));
            Ok(())
        });
        assert_eq!(bus.publish(&entered()), 1);
        assert_eq!(bus.subscriber_count::<PlayerExitedZone>(), 1);
    }

    #[test]
    fn clear_all_drops_everything() {
        let bus = EventBus::default();
        bus.subscribe(|_: &PlayerEnteredZone| Ok(()));
        bus.subscribe(|_: &PlayerExitedZone| Ok(()));
        bus.clear_all();
        assert_eq!(bus.publish(&entered()), 0);
    }
}
