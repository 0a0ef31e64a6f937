use super::events::SessionEvents;
use super::state::ConnectionState;
use super::subscription::SubscriptionHandle;
use crate::error::{Result, SessionError};
use crate::transport::{
    LostCallback, MessageCallback, Transport, TransportClient, TransportSubscriptionId,
};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use url::Url;

/// Decodes a raw body and hands it to the caller's handler
pub(crate) type Dispatch = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

pub(crate) struct SubscriptionEntry {
    pub(crate) topic: String,
    pub(crate) epoch: u64,
    pub(crate) transport_id: Option<TransportSubscriptionId>,
    dispatch: Dispatch,
}

/// Pending `connect`; resets the session if the future is dropped unresolved
struct ConnectAttempt {
    inner: Arc<SessionInner>,
    epoch: u64,
}

impl Drop for ConnectAttempt {
    fn drop(&mut self) {
        self.inner.abandon_connect(self.epoch);
    }
}

/// Connection state and the client it owns; always mutated together
#[derive(Default)]
struct Slot {
    state: ConnectionState,
    client: Option<Arc<dyn TransportClient>>,
}

pub(crate) struct SessionInner {
    endpoint: Url,
    transport: Arc<dyn Transport>,
    events: SessionEvents,

    /// Generation token; bumped under the slot lock whenever a connect starts
    /// or the connection is torn down
    epoch: AtomicU64,

    slot: Mutex<Slot>,

    /// Active subscriptions, keyed by session-local id
    pub(crate) subscriptions: DashMap<u64, SubscriptionEntry>,
    next_subscription_id: AtomicU64,
}

/// One logical connection to a broker endpoint.
///
/// Cloning yields another handle to the same session. The session owns at
/// most one transport client at a time; every subscription it hands out is
/// tied to the connection epoch it was created in and is released when the
/// session disconnects.
///
/// ```no_run
/// use messenger::session::Session;
/// use messenger::transport::MemoryBroker;
/// use std::sync::Arc;
///
/// # async fn example() -> messenger::error::Result<()> {
/// let broker = MemoryBroker::new();
/// let session = Session::open(Arc::new(broker.transport()), "ws://localhost:8080/hello").await?;
///
/// session
///     .subscribe("/topic/greetings", |payload| println!("{}", payload["content"]))
///     .await?;
/// session
///     .send("/app/hello", &serde_json::json!({"name": "Ada"}))
///     .await?;
///
/// session.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a disconnected session for `endpoint_url`
    pub fn new(transport: Arc<dyn Transport>, endpoint_url: &str) -> Result<Self> {
        Self::with_events(transport, endpoint_url, SessionEvents::default())
    }

    /// Create a disconnected session with lifecycle hooks
    pub fn with_events(
        transport: Arc<dyn Transport>,
        endpoint_url: &str,
        events: SessionEvents,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint_url).map_err(|e| {
            SessionError::connection(endpoint_url, format!("invalid endpoint URL: {}", e))
        })?;

        Ok(Self {
            inner: Arc::new(SessionInner {
                endpoint,
                transport,
                events,
                epoch: AtomicU64::new(0),
                slot: Mutex::new(Slot::default()),
                subscriptions: DashMap::new(),
                next_subscription_id: AtomicU64::new(0),
            }),
        })
    }

    /// Create a session and wait for it to connect
    pub async fn open(transport: Arc<dyn Transport>, endpoint_url: &str) -> Result<Self> {
        let session = Self::new(transport, endpoint_url)?;
        session.connect().await?;
        Ok(session)
    }

    /// Start connecting.
    ///
    /// The state moves to `Connecting` before this returns; the returned
    /// future resolves once the transport answers. If `disconnect` runs in
    /// the meantime the late connection is closed and the future resolves to
    /// a connection error without the session ever reaching `Connected`.
    /// Dropping the future before it resolves returns the session to
    /// `Disconnected`.
    pub fn connect(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let attempt = self.inner.begin_connect().map(|epoch| ConnectAttempt {
            inner: Arc::clone(&self.inner),
            epoch,
        });

        async move {
            let attempt = attempt?;
            attempt.inner.finish_connect(attempt.epoch).await
        }
    }

    /// Subscribe to `topic`, handing each decoded JSON payload to `handler`.
    ///
    /// Payloads reach the handler in the order the transport delivered them.
    /// Bodies that are not valid JSON are reported through `on_error` and
    /// never reach the handler.
    pub async fn subscribe<F>(&self, topic: &str, handler: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe_as::<Value, F>(topic, handler).await
    }

    /// Subscribe to `topic`, decoding each payload into `T`
    pub async fn subscribe_as<T, F>(&self, topic: &str, handler: F) -> Result<SubscriptionHandle>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let dispatch: Dispatch = Arc::new(move |body: &str| {
            let payload: T = serde_json::from_str(body)?;
            handler(payload);
            Ok(())
        });

        self.inner.register(topic, dispatch).await
    }

    /// Serialize `payload` and publish it to `destination`.
    ///
    /// Fire-and-forget: success means the transport accepted the message,
    /// not that anyone received it.
    pub async fn send<T>(&self, destination: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let (client, _) = self.inner.connected("send")?;
        let body = serde_json::to_string(payload)?;

        debug!(destination = %destination, bytes = body.len(), "Sending message");

        client
            .publish(destination, body)
            .await
            .map_err(|e| SessionError::from_transport(self.inner.endpoint.as_str(), e))
    }

    /// Release every subscription, close the transport client and return to
    /// `Disconnected`. Calling it again has no effect.
    pub async fn disconnect(&self) {
        let (previous, torn_down, client) = {
            let mut slot = self.inner.slot();
            if slot.state == ConnectionState::Disconnected {
                return;
            }
            let torn_down = self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            let previous = slot.state;
            slot.state = ConnectionState::Disconnected;
            (previous, torn_down, slot.client.take())
        };

        let transport_ids = self.inner.release_subscriptions(torn_down);

        if let Some(client) = client {
            for id in transport_ids {
                if let Err(e) = client.unsubscribe(id).await {
                    debug!(error = %e, "Transport unsubscribe failed during disconnect");
                }
            }
            client.close().await;
        }

        info!(
            endpoint = %self.inner.endpoint,
            previous = %previous,
            "Session disconnected"
        );
        self.inner.events.emit_disconnect(None);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.slot().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn endpoint_url(&self) -> &str {
        self.inner.endpoint.as_str()
    }

    /// URL negotiated by the transport, while connected
    pub fn transport_url(&self) -> Option<String> {
        self.inner
            .slot()
            .client
            .as_ref()
            .map(|client| client.transport_url().to_string())
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Topics with an active subscription, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .inner
            .subscriptions
            .iter()
            .map(|entry| entry.topic.clone())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }
}

impl SessionInner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn begin_connect(&self) -> Result<u64> {
        let mut slot = self.slot();
        if slot.state != ConnectionState::Disconnected {
            return Err(SessionError::InvalidState {
                operation: "connect",
                state: slot.state,
            });
        }

        slot.state = ConnectionState::Connecting;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        info!(endpoint = %self.endpoint, epoch = epoch, "Connecting");
        Ok(epoch)
    }

    /// Back out of a connect whose future went away before the transport
    /// answered. No-op once the attempt has resolved or been superseded.
    fn abandon_connect(&self, epoch: u64) {
        let mut slot = self.slot();
        if self.current_epoch() != epoch || slot.state != ConnectionState::Connecting {
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        slot.state = ConnectionState::Disconnected;

        info!(endpoint = %self.endpoint, epoch = epoch, "Connect abandoned");
    }

    async fn finish_connect(self: &Arc<Self>, epoch: u64) -> Result<()> {
        let weak = Arc::downgrade(self);
        let on_lost: LostCallback = Arc::new(move |reason: String| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_lost(epoch, &reason);
            }
        });

        match self.transport.open(&self.endpoint, on_lost).await {
            Err(e) => {
                let err = SessionError::from_transport(self.endpoint.as_str(), e);

                let current = {
                    let mut slot = self.slot();
                    let current =
                        self.current_epoch() == epoch && slot.state == ConnectionState::Connecting;
                    if current {
                        slot.state = ConnectionState::Disconnected;
                    }
                    current
                };

                if current {
                    warn!(endpoint = %self.endpoint, error = %err, "Connect failed");
                    self.events.emit_error(&err);
                } else {
                    debug!(epoch = epoch, "Ignoring failure of superseded connect");
                }

                Err(err)
            }
            Ok(client) => {
                let accepted = {
                    let mut slot = self.slot();
                    let accepted =
                        self.current_epoch() == epoch && slot.state == ConnectionState::Connecting;
                    if accepted {
                        slot.client = Some(Arc::clone(&client));
                        slot.state = ConnectionState::Connected;
                    }
                    accepted
                };

                if !accepted {
                    info!(epoch = epoch, "Discarding connect completed after disconnect");
                    client.close().await;
                    return Err(SessionError::connection(
                        self.endpoint.as_str(),
                        "connect superseded by disconnect",
                    ));
                }

                info!(
                    endpoint = %self.endpoint,
                    transport_url = %client.transport_url(),
                    "Connected"
                );
                self.events.emit_connect();
                Ok(())
            }
        }
    }

    /// Client and epoch of the current connection, or an `InvalidState` error
    /// naming `operation`
    fn connected(&self, operation: &'static str) -> Result<(Arc<dyn TransportClient>, u64)> {
        let slot = self.slot();
        match (&slot.state, &slot.client) {
            (ConnectionState::Connected, Some(client)) => {
                Ok((Arc::clone(client), self.current_epoch()))
            }
            _ => Err(SessionError::InvalidState {
                operation,
                state: slot.state,
            }),
        }
    }

    /// Client of the connection opened in `epoch`, if that connection is still up
    pub(crate) fn client_for_epoch(&self, epoch: u64) -> Option<Arc<dyn TransportClient>> {
        let slot = self.slot();
        if self.current_epoch() == epoch && slot.state == ConnectionState::Connected {
            slot.client.clone()
        } else {
            None
        }
    }

    async fn register(
        self: &Arc<Self>,
        topic: &str,
        dispatch: Dispatch,
    ) -> Result<SubscriptionHandle> {
        let (client, epoch) = self.connected("subscribe")?;

        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.subscriptions.insert(
            id,
            SubscriptionEntry {
                topic: topic.to_string(),
                epoch,
                transport_id: None,
                dispatch,
            },
        );

        let weak = Arc::downgrade(self);
        let on_message: MessageCallback = Arc::new(move |body: String| {
            if let Some(inner) = weak.upgrade() {
                inner.deliver(id, epoch, &body);
            }
        });

        let transport_id = match client.subscribe(topic, on_message).await {
            Ok(transport_id) => transport_id,
            Err(e) => {
                self.subscriptions.remove(&id);
                return Err(SessionError::from_transport(self.endpoint.as_str(), e));
            }
        };

        // The session may have disconnected while the transport was subscribing
        let recorded = self.current_epoch() == epoch
            && match self.subscriptions.get_mut(&id) {
                Some(mut entry) => {
                    entry.transport_id = Some(transport_id);
                    true
                }
                None => false,
            };

        if !recorded {
            self.subscriptions.remove(&id);
            return Err(SessionError::InvalidState {
                operation: "subscribe",
                state: self.slot().state,
            });
        }

        info!(topic = %topic, subscription = id, "Subscribed");

        Ok(SubscriptionHandle::new(id, topic, epoch, Arc::downgrade(self)))
    }

    /// Route one raw body to the subscription it was registered for
    fn deliver(&self, id: u64, epoch: u64, body: &str) {
        if self.current_epoch() != epoch {
            debug!(subscription = id, "Dropping message for released subscription");
            return;
        }

        let dispatch = match self.subscriptions.get(&id) {
            Some(entry) if entry.epoch == epoch => Arc::clone(&entry.dispatch),
            _ => return,
        };

        if let Err(err) = dispatch(body) {
            warn!(subscription = id, error = %err, "Failed to decode inbound message");
            self.events.emit_error(&err);
        }
    }

    /// Drop the subscriptions made in `torn_down` or earlier, returning their
    /// transport ids. Entries from a later connection are left alone.
    fn release_subscriptions(&self, torn_down: u64) -> Vec<TransportSubscriptionId> {
        let mut ids = Vec::new();
        self.subscriptions.retain(|_, entry| {
            if entry.epoch > torn_down {
                return true;
            }
            ids.extend(entry.transport_id);
            false
        });
        ids
    }

    fn handle_lost(&self, epoch: u64, reason: &str) {
        let dropped_client = {
            let mut slot = self.slot();
            if self.current_epoch() != epoch || slot.state == ConnectionState::Disconnected {
                return;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            slot.state = ConnectionState::Disconnected;
            slot.client.take()
        };
        drop(dropped_client);

        self.release_subscriptions(epoch);

        warn!(endpoint = %self.endpoint, reason = %reason, "Transport connection lost");
        self.events.emit_disconnect(Some(reason));
        self.events
            .emit_error(&SessionError::connection(self.endpoint.as_str(), reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBroker;

    #[tokio::test]
    async fn test_late_release_keeps_newer_subscriptions() {
        let broker = MemoryBroker::new();
        let session = Session::open(Arc::new(broker.transport()), "wss://example/endpoint")
            .await
            .unwrap();
        let first_epoch = session.inner.current_epoch();
        session.disconnect().await;

        session.connect().await.unwrap();
        let seen = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&seen);
        let handle = session
            .subscribe("/topic/greetings", move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        // A teardown of the first connection finishing after the reconnect
        let released = session.inner.release_subscriptions(first_epoch);
        broker.publish("/topic/greetings", r#"{"content":"hi"}"#);

        assert!(released.is_empty());
        assert!(handle.is_active());
        assert_eq!(session.subscription_count(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
