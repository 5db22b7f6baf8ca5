use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use realtime_events::ServerEvent;

use crate::invalidation::{CacheInvalidator, CacheTarget};

/// Notification ids already delivered this session, bounded at 100.
const SEEN_SET_CAPACITY: usize = 100;

/// Bounded set of dedup keys with FIFO eviction: inserting beyond the bound
/// trims the oldest entries so only the most recent 100 remain.
pub struct SeenSet {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Returns false if the key was already present (duplicate).
    pub fn insert(&mut self, key: String) -> bool {
        if self.members.contains(&key) {
            return false;
        }
        self.members.insert(key.clone());
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new(SEEN_SET_CAPACITY)
    }
}

type SubscriberFn = Arc<dyn Fn(&ServerEvent) + Send + Sync + 'static>;
type SubscriberList = Arc<Mutex<Vec<(u64, SubscriberFn)>>>;

/// Handle returned by [`EventDispatcher::subscribe`]. Cancelling is
/// idempotent; a cancelled subscriber stops receiving subsequent events but
/// an in-progress fan-out pass is unaffected (snapshot semantics).
pub struct SubscriptionHandle {
    id: u64,
    subscribers: SubscriberList,
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .retain(|(id, _)| *id != self.id);
    }
}

/// Dedup and fan-out layer.
///
/// Filters duplicate notifications through the [`SeenSet`], then delivers
/// every accepted event to all subscribers in registration order,
/// synchronously, over a snapshot taken before the first callback. A
/// panicking subscriber is caught and logged; it never stops the pass.
pub struct EventDispatcher {
    subscribers: SubscriberList,
    next_id: AtomicU64,
    seen: Mutex<SeenSet>,
    invalidator: Arc<dyn CacheInvalidator>,
}

impl EventDispatcher {
    pub fn new(invalidator: Arc<dyn CacheInvalidator>) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
            seen: Mutex::new(SeenSet::default()),
            invalidator,
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push((id, Arc::new(callback)));
        SubscriptionHandle {
            id,
            subscribers: self.subscribers.clone(),
        }
    }

    /// Handle one inbound event. Returns false when the event was dropped
    /// as a duplicate notification; duplicates reach no subscriber.
    pub async fn dispatch(&self, event: &ServerEvent) -> bool {
        // Only notifications with an id are deduplicated. Messages are not
        // assumed unique by content, so identical NewMessage events all
        // deliver.
        if let ServerEvent::NewNotification { notification } = event {
            if let Some(id) = notification.id {
                let key = format!("notification-{id}");
                let mut seen = self.seen.lock().expect("seen set poisoned");
                if !seen.insert(key) {
                    tracing::debug!(notification_id = id, "dropping duplicate notification");
                    return false;
                }
            }
        }

        // Snapshot so subscribe/cancel during fan-out only affects
        // subsequent events.
        let snapshot: Vec<SubscriberFn> = self
            .subscribers
            .lock()
            .expect("subscriber list poisoned")
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::warn!(
                    event_type = event.event_type(),
                    "subscriber panicked during fan-out, continuing"
                );
            }
        }

        self.run_builtin_reactions(event).await;
        true
    }

    /// Cache-invalidation signals, after external subscribers and not
    /// cancellable by them.
    async fn run_builtin_reactions(&self, event: &ServerEvent) {
        let target = match event {
            ServerEvent::NewNotification { .. } => Some(CacheTarget::Notifications),
            ServerEvent::BadgeCountsUpdate { .. } => Some(CacheTarget::BadgeCounts),
            ServerEvent::NewMessage { .. } => Some(CacheTarget::Conversations),
            ServerEvent::Connected { .. } | ServerEvent::Opaque { .. } => None,
        };
        if let Some(target) = target {
            self.invalidator.invalidate(target).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use realtime_events::Notification;
    use serde_json::json;

    fn notification_event(id: i64) -> ServerEvent {
        ServerEvent::NewNotification {
            notification: Notification {
                id: Some(id),
                title: "t".into(),
                message: "m".into(),
                category: "feedback".into(),
                extra: serde_json::Map::new(),
            },
        }
    }

    fn message_event() -> ServerEvent {
        ServerEvent::NewMessage {
            message: json!({"body": "hi"}),
            sender: json!({"id": 1}),
            conversation_id: 5,
        }
    }

    fn dispatcher() -> EventDispatcher {
        EventDispatcher::new(Arc::new(crate::invalidation::NoopInvalidator))
    }

    fn counting_subscriber(
        dispatcher: &EventDispatcher,
    ) -> (Arc<Mutex<Vec<String>>>, SubscriptionHandle) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let handle = dispatcher.subscribe(move |event| {
            sink.lock().unwrap().push(event.event_type().to_string());
        });
        (log, handle)
    }

    #[test]
    fn seen_set_trims_fifo_to_capacity() {
        let mut seen = SeenSet::default();
        for id in 1..=150 {
            assert!(seen.insert(format!("notification-{id}")));
        }
        assert_eq!(seen.len(), 100);
        for id in 1..=50 {
            assert!(!seen.contains(&format!("notification-{id}")));
        }
        for id in 51..=150 {
            assert!(seen.contains(&format!("notification-{id}")));
        }
        // An evicted id is accepted again.
        assert!(seen.insert("notification-1".into()));
    }

    #[tokio::test]
    async fn duplicate_notifications_deliver_exactly_once() {
        let dispatcher = dispatcher();
        let (log, _handle) = counting_subscriber(&dispatcher);

        assert!(dispatcher.dispatch(&notification_event(1)).await);
        assert!(!dispatcher.dispatch(&notification_event(1)).await);
        assert!(dispatcher.dispatch(&notification_event(2)).await);
        assert!(!dispatcher.dispatch(&notification_event(1)).await);

        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn identical_message_events_are_never_deduplicated() {
        let dispatcher = dispatcher();
        let (log, _handle) = counting_subscriber(&dispatcher);

        assert!(dispatcher.dispatch(&message_event()).await);
        assert!(dispatcher.dispatch(&message_event()).await);

        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn notification_without_id_is_not_deduplicated() {
        let dispatcher = dispatcher();
        let (log, _handle) = counting_subscriber(&dispatcher);

        let event = ServerEvent::NewNotification {
            notification: Notification {
                id: None,
                title: "t".into(),
                message: "m".into(),
                category: "feedback".into(),
                extra: serde_json::Map::new(),
            },
        };
        assert!(dispatcher.dispatch(&event).await);
        assert!(dispatcher.dispatch(&event).await);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_stop_fanout() {
        let dispatcher = dispatcher();
        let (first_log, _first) = counting_subscriber(&dispatcher);
        let _panicking = dispatcher.subscribe(|_| panic!("subscriber bug"));
        let (last_log, _last) = counting_subscriber(&dispatcher);

        assert!(dispatcher.dispatch(&notification_event(1)).await);

        assert_eq!(first_log.lock().unwrap().len(), 1);
        assert_eq!(last_log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delivery_is_in_registration_order() {
        let dispatcher = dispatcher();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["a", "b", "c"] {
            let sink = order.clone();
            // Handles intentionally dropped; dropping does not unsubscribe.
            let _handle = dispatcher.subscribe(move |_| {
                sink.lock().unwrap().push(label);
            });
        }

        dispatcher.dispatch(&message_event()).await;
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cancel_during_fanout_only_affects_subsequent_events() {
        let dispatcher = dispatcher();

        // First subscriber cancels the victim (registered after it) mid-pass.
        let victim_slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let slot = victim_slot.clone();
        let _canceller = dispatcher.subscribe(move |_| {
            if let Some(handle) = slot.lock().unwrap().as_ref() {
                handle.cancel();
            }
        });
        let (victim_log, victim_handle) = counting_subscriber(&dispatcher);
        *victim_slot.lock().unwrap() = Some(victim_handle);
        let (after_log, _after) = counting_subscriber(&dispatcher);

        dispatcher.dispatch(&notification_event(1)).await;
        // Cancelled mid-pass, but the snapshot still delivers this event.
        assert_eq!(victim_log.lock().unwrap().len(), 1);
        assert_eq!(after_log.lock().unwrap().len(), 1);

        dispatcher.dispatch(&notification_event(2)).await;
        assert_eq!(victim_log.lock().unwrap().len(), 1);
        assert_eq!(after_log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn subscription_cancel_is_idempotent() {
        let dispatcher = dispatcher();
        let (log, handle) = counting_subscriber(&dispatcher);

        dispatcher.dispatch(&message_event()).await;
        handle.cancel();
        handle.cancel();
        dispatcher.dispatch(&message_event()).await;

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn opaque_events_reach_generic_subscribers() {
        let dispatcher = dispatcher();
        let (log, _handle) = counting_subscriber(&dispatcher);

        let event = ServerEvent::Opaque {
            event_type: "posting_expired".into(),
            payload: json!({"type": "posting_expired", "posting_id": 3}),
        };
        assert!(dispatcher.dispatch(&event).await);
        assert!(dispatcher.dispatch(&event).await); // never deduplicated
        assert_eq!(*log.lock().unwrap(), vec!["posting_expired"; 2]);
    }

    struct RecordingInvalidator(Mutex<Vec<CacheTarget>>);

    #[async_trait]
    impl CacheInvalidator for RecordingInvalidator {
        async fn invalidate(&self, target: CacheTarget) {
            self.0.lock().unwrap().push(target);
        }
    }

    #[tokio::test]
    async fn builtin_reactions_signal_cache_invalidation() {
        let invalidator = Arc::new(RecordingInvalidator(Mutex::new(Vec::new())));
        let dispatcher = EventDispatcher::new(invalidator.clone());

        dispatcher.dispatch(&notification_event(1)).await;
        dispatcher.dispatch(&message_event()).await;
        dispatcher
            .dispatch(&ServerEvent::BadgeCountsUpdate {
                counts: Default::default(),
            })
            .await;
        // Duplicates drop before built-in reactions too.
        dispatcher.dispatch(&notification_event(1)).await;

        assert_eq!(
            *invalidator.0.lock().unwrap(),
            vec![
                CacheTarget::Notifications,
                CacheTarget::Conversations,
                CacheTarget::BadgeCounts,
            ]
        );
    }
}
