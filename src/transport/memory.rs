use super::{
    negotiated_url, LostCallback, MessageCallback, Transport, TransportClient, TransportError,
    TransportSubscriptionId,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Client id used for listeners registered directly on the broker.
const BROKER_CLIENT_ID: u64 = 0;

struct TopicSubscriber {
    client_id: u64,
    subscription_id: TransportSubscriptionId,
    callback: MessageCallback,
}

#[derive(Default)]
struct BrokerInner {
    /// Subscribers per topic, in registration order
    topics: DashMap<String, Vec<TopicSubscriber>>,

    /// Loss callbacks of currently open clients
    clients: DashMap<u64, LostCallback>,

    next_client_id: AtomicU64,
    next_subscription_id: AtomicU64,
    refusing: AtomicBool,
    opened: AtomicU64,
    published: AtomicU64,
}

/// In-process message broker shared by every [`MemoryTransport`] built from it.
///
/// Delivery is synchronous: `publish` invokes each subscriber callback in
/// registration order before returning.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that opens clients against this broker
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
        }
    }

    /// Deliver `body` to every subscriber of `topic`; returns the receiver count.
    pub fn publish(&self, topic: &str, body: impl Into<String>) -> usize {
        let body = body.into();
        self.inner.published.fetch_add(1, Ordering::SeqCst);

        // Callbacks may publish again, so never hold the map entry while invoking them
        let callbacks: Vec<MessageCallback> = self
            .inner
            .topics
            .get(topic)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.callback)).collect())
            .unwrap_or_default();

        debug!(topic = %topic, receivers = callbacks.len(), "Delivering message");

        for callback in &callbacks {
            callback(body.clone());
        }

        callbacks.len()
    }

    /// Register a broker-side listener (e.g. a responder emulating a server endpoint)
    pub fn listen(&self, topic: &str, callback: MessageCallback) -> TransportSubscriptionId {
        self.add_subscriber(BROKER_CLIENT_ID, topic, callback)
    }

    /// Simulate a transport failure: every open client is dropped and notified
    pub fn sever(&self, reason: &str) {
        let client_ids: Vec<u64> = self.inner.clients.iter().map(|e| *e.key()).collect();

        info!(clients = client_ids.len(), reason = %reason, "Severing memory broker clients");

        for client_id in client_ids {
            self.remove_client_subscriptions(client_id);
            if let Some((_, on_lost)) = self.inner.clients.remove(&client_id) {
                on_lost(reason.to_string());
            }
        }
    }

    /// Make subsequent `open` calls fail (or succeed again)
    pub fn set_refusing(&self, refusing: bool) {
        self.inner.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of clients opened so far
    pub fn open_count(&self) -> u64 {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Number of publish calls seen so far (client and broker side)
    pub fn publish_count(&self) -> u64 {
        self.inner.published.load(Ordering::SeqCst)
    }

    /// Number of clients currently open
    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// Number of subscribers registered on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    fn add_subscriber(
        &self,
        client_id: u64,
        topic: &str,
        callback: MessageCallback,
    ) -> TransportSubscriptionId {
        let subscription_id = self.inner.next_subscription_id.fetch_add(1, Ordering::SeqCst) + 1;

        self.inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(TopicSubscriber {
                client_id,
                subscription_id,
                callback,
            });

        subscription_id
    }

    fn remove_subscriber(&self, client_id: u64, subscription_id: TransportSubscriptionId) -> bool {
        let mut removed = false;
        for mut subs in self.inner.topics.iter_mut() {
            let before = subs.len();
            subs.retain(|s| !(s.client_id == client_id && s.subscription_id == subscription_id));
            removed |= subs.len() != before;
        }
        self.inner.topics.retain(|_, subs| !subs.is_empty());
        removed
    }

    fn remove_client_subscriptions(&self, client_id: u64) {
        for mut subs in self.inner.topics.iter_mut() {
            subs.retain(|s| s.client_id != client_id);
        }
        self.inner.topics.retain(|_, subs| !subs.is_empty());
    }
}

/// [`Transport`] backed by a [`MemoryBroker`]
#[derive(Clone)]
pub struct MemoryTransport {
    broker: MemoryBroker,
}

impl MemoryTransport {
    pub fn new(broker: MemoryBroker) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        endpoint: &Url,
        on_lost: LostCallback,
    ) -> Result<Arc<dyn TransportClient>, TransportError> {
        if self.broker.inner.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Refused(format!(
                "memory broker refused {}",
                endpoint
            )));
        }

        let client_id = self.broker.inner.next_client_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.broker.inner.clients.insert(client_id, on_lost);
        self.broker.inner.opened.fetch_add(1, Ordering::SeqCst);

        let url = negotiated_url(endpoint);
        debug!(client_id = client_id, url = %url, "Opened memory client");

        Ok(Arc::new(MemoryClient {
            broker: self.broker.clone(),
            client_id,
            url,
        }))
    }
}

struct MemoryClient {
    broker: MemoryBroker,
    client_id: u64,
    url: String,
}

impl MemoryClient {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.broker.inner.clients.contains_key(&self.client_id) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

#[async_trait]
impl TransportClient for MemoryClient {
    fn transport_url(&self) -> &str {
        &self.url
    }

    async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<TransportSubscriptionId, TransportError> {
        self.ensure_open()?;
        if topic.is_empty() {
            return Err(TransportError::InvalidDestination(topic.to_string()));
        }
        Ok(self.broker.add_subscriber(self.client_id, topic, on_message))
    }

    async fn unsubscribe(&self, id: TransportSubscriptionId) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.broker.remove_subscriber(self.client_id, id);
        Ok(())
    }

    async fn publish(&self, destination: &str, body: String) -> Result<(), TransportError> {
        self.ensure_open()?;
        if destination.is_empty() {
            return Err(TransportError::InvalidDestination(destination.to_string()));
        }
        self.broker.publish(destination, body);
        Ok(())
    }

    async fn close(&self) {
        self.broker.remove_client_subscriptions(self.client_id);
        self.broker.inner.clients.remove(&self.client_id);
        debug!(client_id = self.client_id, "Closed memory client");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn endpoint() -> Url {
        Url::parse("ws://localhost:8080/hello").unwrap()
    }

    fn noop_lost() -> LostCallback {
        Arc::new(|_: String| {})
    }

    fn recorder() -> (MessageCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |body: String| sink.lock().unwrap().push(body)), seen)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_in_order() {
        let broker = MemoryBroker::new();
        let client = broker.transport().open(&endpoint(), noop_lost()).await.unwrap();
        let (callback, seen) = recorder();

        client.subscribe("/topic/greetings", callback).await.unwrap();
        client.publish("/topic/greetings", "1".into()).await.unwrap();
        client.publish("/topic/greetings", "2".into()).await.unwrap();
        client.publish("/topic/other", "3".into()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["1", "2"]);
        assert_eq!(broker.publish_count(), 3);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = MemoryBroker::new();
        let client = broker.transport().open(&endpoint(), noop_lost()).await.unwrap();
        let (callback, seen) = recorder();

        let id = client.subscribe("/topic/greetings", callback).await.unwrap();
        client.unsubscribe(id).await.unwrap();
        broker.publish("/topic/greetings", "late");

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(broker.subscriber_count("/topic/greetings"), 0);
    }

    #[tokio::test]
    async fn test_refusing_broker_fails_open() {
        let broker = MemoryBroker::new();
        broker.set_refusing(true);

        let result = broker.transport().open(&endpoint(), noop_lost()).await;
        assert!(matches!(result, Err(TransportError::Refused(_))));
        assert_eq!(broker.open_count(), 0);
    }

    #[tokio::test]
    async fn test_sever_notifies_and_drops_client() {
        let broker = MemoryBroker::new();
        let lost = Arc::new(Mutex::new(Vec::new()));
        let lost_sink = Arc::clone(&lost);
        let client = broker
            .transport()
            .open(&endpoint(), Arc::new(move |reason: String| lost_sink.lock().unwrap().push(reason)))
            .await
            .unwrap();
        let (callback, _) = recorder();
        client.subscribe("/topic/greetings", callback).await.unwrap();

        broker.sever("broker restart");

        assert_eq!(*lost.lock().unwrap(), vec!["broker restart"]);
        assert_eq!(broker.client_count(), 0);
        assert_eq!(broker.subscriber_count("/topic/greetings"), 0);
        assert_eq!(
            client.publish("/topic/greetings", "x".into()).await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_close_does_not_fire_lost_callback() {
        let broker = MemoryBroker::new();
        let lost = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&lost);
        let client = broker
            .transport()
            .open(
                &endpoint(),
                Arc::new(move |_: String| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        client.close().await;
        broker.sever("after close");

        assert_eq!(lost.load(Ordering::SeqCst), 0);
        assert_eq!(broker.client_count(), 0);
    }
}
