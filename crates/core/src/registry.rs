use std::{collections::HashMap, fmt, sync::Arc};

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::DeliveryResult;

/// Stable identity of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned when a payload cannot be handed to a subscriber.
#[derive(Debug, Error)]
#[error("subscriber {0} is no longer reachable")]
pub struct SendError(pub SubscriberId);

/// One live subscriber connection.
pub trait Subscriber: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Returns `true` once the underlying connection has gone away.
    fn is_closed(&self) -> bool;

    /// Hands a serialized event to the connection without waiting on the peer.
    fn send(&self, payload: &Arc<str>) -> Result<(), SendError>;
}

/// In-memory mapping of webhook identifiers to their live subscribers.
///
/// All mutations run under one lock, so `register`, `deregister` and
/// `snapshot_and_prune` on the same key never interleave. A key never maps to
/// an empty sequence.
pub struct SubscriptionRegistry<S: ?Sized> {
    entries: Mutex<HashMap<String, Vec<Arc<S>>>>,
}

impl<S: Subscriber + ?Sized> SubscriptionRegistry<S> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Appends `subscriber` to the sequence for `webhook_id`.
    pub async fn register(&self, webhook_id: &str, subscriber: Arc<S>) {
        let mut entries = self.entries.lock().await;
        entries
            .entry(webhook_id.to_string())
            .or_default()
            .push(subscriber);
    }

    /// Removes the subscriber with `subscriber_id`, dropping the key once it
    /// has no subscribers left. Returns whether anything was removed.
    pub async fn deregister(&self, webhook_id: &str, subscriber_id: SubscriberId) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(subscribers) = entries.get_mut(webhook_id) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id() != subscriber_id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            entries.remove(webhook_id);
        }
        removed
    }

    /// Delivers to every open subscriber of `webhook_id` and keeps only those
    /// that accepted the payload.
    ///
    /// Closed subscribers are dropped without a send attempt, and a failed
    /// send only drops that subscriber. The key is removed when no subscriber
    /// survives; an unknown key is left untouched.
    pub async fn snapshot_and_prune<F>(&self, webhook_id: &str, mut send: F) -> DeliveryResult
    where
        F: FnMut(&S) -> Result<(), SendError>,
    {
        let mut entries = self.entries.lock().await;
        let Some(current) = entries.remove(webhook_id) else {
            return DeliveryResult::default();
        };

        let total = current.len();
        let survivors: Vec<Arc<S>> = current
            .into_iter()
            .filter(|subscriber| !subscriber.is_closed() && send(&**subscriber).is_ok())
            .collect();

        let result = DeliveryResult {
            delivered: survivors.len(),
            pruned: total - survivors.len(),
        };
        if !survivors.is_empty() {
            entries.insert(webhook_id.to_string(), survivors);
        }
        result
    }

    /// Number of subscribers held for `webhook_id`, or `None` when the key is
    /// absent.
    pub async fn subscriber_count(&self, webhook_id: &str) -> Option<usize> {
        self.entries.lock().await.get(webhook_id).map(Vec::len)
    }

    pub async fn webhook_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn total_subscribers(&self) -> usize {
        self.entries.lock().await.values().map(Vec::len).sum()
    }
}

impl<S: Subscriber + ?Sized> Default for SubscriptionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex as StdMutex,
    };

    /// In-memory subscriber recording every payload it accepts.
    pub(crate) struct FakeSubscriber {
        id: SubscriberId,
        closed: AtomicBool,
        failing: AtomicBool,
        received: StdMutex<Vec<String>>,
    }

    impl FakeSubscriber {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                id: SubscriberId::new(),
                closed: AtomicBool::new(false),
                failing: AtomicBool::new(false),
                received: StdMutex::new(Vec::new()),
            })
        }

        pub(crate) fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        pub(crate) fn fail_sends(&self) {
            self.failing.store(true, Ordering::SeqCst);
        }

        pub(crate) fn received(&self) -> Vec<String> {
            self.received.lock().expect("received lock").clone()
        }
    }

    impl Subscriber for FakeSubscriber {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn send(&self, payload: &Arc<str>) -> Result<(), SendError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SendError(self.id));
            }
            self.received
                .lock()
                .expect("received lock")
                .push(payload.to_string());
            Ok(())
        }
    }

    fn payload(text: &str) -> Arc<str> {
        Arc::from(text)
    }

    async fn deliver(
        registry: &SubscriptionRegistry<FakeSubscriber>,
        id: &str,
        text: &str,
    ) -> DeliveryResult {
        let message = payload(text);
        registry
            .snapshot_and_prune(id, |subscriber| subscriber.send(&message))
            .await
    }

    #[tokio::test]
    async fn unknown_key_is_not_created() {
        let registry = SubscriptionRegistry::<FakeSubscriber>::new();
        let result = deliver(&registry, "missing", "x").await;

        assert_eq!(result, DeliveryResult::default());
        assert_eq!(registry.subscriber_count("missing").await, None);
        assert_eq!(registry.webhook_count().await, 0);
    }

    #[tokio::test]
    async fn register_then_deliver_reaches_subscriber_once() {
        let registry = SubscriptionRegistry::new();
        let subscriber = FakeSubscriber::new();
        registry.register("hook", subscriber.clone()).await;

        let result = deliver(&registry, "hook", "event").await;

        assert_eq!(result.delivered, 1);
        assert_eq!(result.pruned, 0);
        assert_eq!(subscriber.received(), vec!["event".to_string()]);
    }

    #[tokio::test]
    async fn failed_send_prunes_only_that_subscriber() {
        let registry = SubscriptionRegistry::new();
        let broken = FakeSubscriber::new();
        let healthy = FakeSubscriber::new();
        registry.register("hook", broken.clone()).await;
        registry.register("hook", healthy.clone()).await;
        broken.fail_sends();

        let first = deliver(&registry, "hook", "one").await;
        assert_eq!(first.delivered, 1);
        assert_eq!(first.pruned, 1);

        let second = deliver(&registry, "hook", "two").await;
        assert_eq!(second.delivered, 1);
        assert_eq!(second.pruned, 0);
        assert_eq!(healthy.received(), vec!["one".to_string(), "two".to_string()]);
        assert!(broken.received().is_empty());
    }

    #[tokio::test]
    async fn closed_subscriber_is_skipped_without_send() {
        let registry = SubscriptionRegistry::new();
        let closed = FakeSubscriber::new();
        registry.register("hook", closed.clone()).await;
        closed.close();

        let result = deliver(&registry, "hook", "event").await;

        assert_eq!(result.delivered, 0);
        assert_eq!(result.pruned, 1);
        assert!(closed.received().is_empty());
    }

    #[tokio::test]
    async fn key_removed_once_every_subscriber_is_pruned() {
        let registry = SubscriptionRegistry::new();
        let closed = FakeSubscriber::new();
        let failing = FakeSubscriber::new();
        registry.register("hook", closed.clone()).await;
        registry.register("hook", failing.clone()).await;
        closed.close();
        failing.fail_sends();

        assert_eq!(registry.subscriber_count("hook").await, Some(2));
        let result = deliver(&registry, "hook", "event").await;

        assert_eq!(result.delivered, 0);
        assert_eq!(registry.subscriber_count("hook").await, None);
    }

    #[tokio::test]
    async fn deregister_is_idempotent_and_drops_empty_key() {
        let registry = SubscriptionRegistry::new();
        let first = FakeSubscriber::new();
        let second = FakeSubscriber::new();
        registry.register("hook", first.clone()).await;
        registry.register("hook", second.clone()).await;

        assert!(registry.deregister("hook", first.id()).await);
        assert!(!registry.deregister("hook", first.id()).await);
        assert_eq!(registry.subscriber_count("hook").await, Some(1));

        assert!(registry.deregister("hook", second.id()).await);
        assert_eq!(registry.subscriber_count("hook").await, None);
        assert!(!registry.deregister("hook", second.id()).await);
        assert!(!registry.deregister("never", SubscriberId::new()).await);
    }

    #[tokio::test]
    async fn keys_are_case_sensitive_and_order_is_preserved() {
        let registry = SubscriptionRegistry::new();
        let upper = FakeSubscriber::new();
        let lower = FakeSubscriber::new();
        registry.register("Hook", upper.clone()).await;
        registry.register("hook", lower.clone()).await;

        deliver(&registry, "Hook", "upper").await;

        assert_eq!(upper.received(), vec!["upper".to_string()]);
        assert!(lower.received().is_empty());
        assert_eq!(registry.webhook_count().await, 2);
        assert_eq!(registry.total_subscribers().await, 2);
    }

    #[tokio::test]
    async fn delivery_follows_registration_order() {
        let registry = SubscriptionRegistry::new();
        let subscribers: Vec<_> = (0..3).map(|_| FakeSubscriber::new()).collect();
        for subscriber in &subscribers {
            registry.register("hook", subscriber.clone()).await;
        }

        let mut order = Vec::new();
        registry
            .snapshot_and_prune("hook", |subscriber| {
                order.push(subscriber.id());
                Ok(())
            })
            .await;

        let expected: Vec<_> = subscribers.iter().map(|subscriber| subscriber.id()).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_is_never_lost() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let seed = FakeSubscriber::new();
        registry.register("hook", seed.clone()).await;

        let mut tasks = Vec::new();
        let mut added = Vec::new();
        for index in 0..32 {
            let subscriber = FakeSubscriber::new();
            added.push(subscriber.clone());
            let registry_for_register = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry_for_register.register("hook", subscriber).await;
            }));
            let registry_for_dispatch = registry.clone();
            tasks.push(tokio::spawn(async move {
                let message = payload(&format!("race-{index}"));
                registry_for_dispatch
                    .snapshot_and_prune("hook", |subscriber| subscriber.send(&message))
                    .await;
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }

        let result = deliver(&registry, "hook", "final").await;
        assert_eq!(result.delivered, 33);
        for subscriber in added.iter().chain(std::iter::once(&seed)) {
            assert_eq!(
                subscriber.received().last().map(String::as_str),
                Some("final")
            );
        }
    }
}
