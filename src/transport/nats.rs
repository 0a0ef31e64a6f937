use super::{
    negotiated_url, LostCallback, MessageCallback, Transport, TransportClient, TransportError,
    TransportSubscriptionId,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Transport backed by core NATS publish/subscribe.
///
/// Destinations are slash-separated (`/topic/greetings`) and map onto
/// dot-separated subjects (`topic.greetings`). Publishing is fire-and-forget,
/// matching NATS' at-most-once delivery.
#[derive(Clone, Debug, Default)]
pub struct NatsTransport;

impl NatsTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Map a slash-separated destination onto a NATS subject
pub(crate) fn destination_to_subject(destination: &str) -> Result<String, TransportError> {
    let trimmed = destination.trim_matches('/');
    let segments: Vec<&str> = trimmed.split('/').collect();

    let valid = !trimmed.is_empty()
        && segments
            .iter()
            .all(|s| !s.is_empty() && !s.chars().any(char::is_whitespace));

    if !valid {
        return Err(TransportError::InvalidDestination(destination.to_string()));
    }

    Ok(segments.join("."))
}

/// Lifecycle flags shared with the connection event callback
#[derive(Default)]
struct ClientFlags {
    closing: AtomicBool,
    lost: AtomicBool,
}

#[async_trait]
impl Transport for NatsTransport {
    async fn open(
        &self,
        endpoint: &Url,
        on_lost: LostCallback,
    ) -> Result<Arc<dyn TransportClient>, TransportError> {
        info!("Connecting to NATS at {}", endpoint);

        let flags = Arc::new(ClientFlags::default());
        let event_flags = Arc::clone(&flags);

        let client = async_nats::ConnectOptions::new()
            .event_callback(move |event| {
                let flags = Arc::clone(&event_flags);
                let on_lost = Arc::clone(&on_lost);
                async move {
                    if let async_nats::Event::Disconnected = event {
                        if !flags.closing.load(Ordering::SeqCst)
                            && !flags.lost.swap(true, Ordering::SeqCst)
                        {
                            warn!("NATS connection lost");
                            on_lost("NATS connection lost".to_string());
                        }
                    }
                }
            })
            .connect(endpoint.as_str())
            .await
            .map_err(|e| TransportError::Refused(e.to_string()))?;

        let url = negotiated_url(endpoint);
        info!(url = %url, "Connected to NATS");

        Ok(Arc::new(NatsClient {
            client,
            url,
            flags,
            readers: DashMap::new(),
            next_id: AtomicU64::new(0),
        }))
    }
}

struct NatsClient {
    client: async_nats::Client,
    url: String,
    flags: Arc<ClientFlags>,
    /// Background reader per subscription
    readers: DashMap<TransportSubscriptionId, JoinHandle<()>>,
    next_id: AtomicU64,
}

impl NatsClient {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.flags.closing.load(Ordering::SeqCst) || self.flags.lost.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransportClient for NatsClient {
    fn transport_url(&self) -> &str {
        &self.url
    }

    async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<TransportSubscriptionId, TransportError> {
        self.ensure_open()?;
        let subject = destination_to_subject(topic)?;

        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let reader = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                match String::from_utf8(message.payload.to_vec()) {
                    Ok(body) => on_message(body),
                    Err(e) => {
                        warn!(subject = %message.subject, error = %e, "Dropping non-UTF-8 message");
                    }
                }
            }
        });

        self.readers.insert(id, reader);
        debug!(subject = %subject, id = id, "Subscribed to NATS subject");

        Ok(id)
    }

    async fn unsubscribe(&self, id: TransportSubscriptionId) -> Result<(), TransportError> {
        if let Some((_, reader)) = self.readers.remove(&id) {
            reader.abort();
        }
        Ok(())
    }

    async fn publish(&self, destination: &str, body: String) -> Result<(), TransportError> {
        self.ensure_open()?;
        let subject = destination_to_subject(destination)?;

        debug!(subject = %subject, bytes = body.len(), "Publishing to NATS");

        self.client
            .publish(subject, body.into())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&self) {
        self.flags.closing.store(true, Ordering::SeqCst);

        for entry in self.readers.iter() {
            entry.value().abort();
        }
        self.readers.clear();

        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush NATS client on close");
        }

        info!("Closed NATS client");
    }
}

impl Drop for NatsClient {
    fn drop(&mut self) {
        for entry in self.readers.iter() {
            entry.value().abort();
        }
    }
}
