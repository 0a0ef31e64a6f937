// Transport collaborators: the narrow surface the session manager talks to

mod memory;
mod nats;

pub use memory::{MemoryBroker, MemoryTransport};
pub use nats::NatsTransport;

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Invoked with the raw (JSON text) body of each message arriving on a topic.
pub type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Invoked once when an open client loses its connection.
pub type LostCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Identifier of one transport-level subscription, scoped to its client.
pub type TransportSubscriptionId = u64;

/// Errors raised by transport implementations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("connection closed")]
    Closed,

    #[error("invalid destination '{0}'")]
    InvalidDestination(String),

    #[error("transport I/O failed: {0}")]
    Io(String),
}

/// Factory side of a transport: establishes clients against an endpoint.
///
/// Implementations own the fallback negotiation and framing; the session
/// manager only ever sees the resulting [`TransportClient`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a client against `endpoint`.
    ///
    /// `on_lost` must be called at most once, when an established client
    /// drops without `close()` having been requested.
    async fn open(
        &self,
        endpoint: &Url,
        on_lost: LostCallback,
    ) -> Result<Arc<dyn TransportClient>, TransportError>;
}

/// One open connection to a broker.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// URL negotiated for this connection (e.g. `.../{server}/{session}/websocket`).
    fn transport_url(&self) -> &str;

    /// Register `on_message` for every message published to `topic`.
    ///
    /// Messages on one subscription must be delivered in arrival order.
    async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<TransportSubscriptionId, TransportError>;

    async fn unsubscribe(&self, id: TransportSubscriptionId) -> Result<(), TransportError>;

    /// Fire-and-forget publish of a JSON body.
    async fn publish(&self, destination: &str, body: String) -> Result<(), TransportError>;

    /// Tear down the connection and every subscription on it.
    async fn close(&self);
}

/// Build a SockJS-style negotiated URL: `{endpoint}/{server}/{session}/websocket`.
pub(crate) fn negotiated_url(endpoint: &Url) -> String {
    let server_id: u16 = rand::thread_rng().gen_range(0..1000);
    let session_id: String = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

    format!(
        "{}/{:03}/{}/websocket",
        endpoint.as_str().trim_end_matches('/'),
        server_id,
        session_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiated_url_shape() {
        let endpoint = Url::parse("ws://localhost:8080/gs-guide-websocket").unwrap();
        let url = negotiated_url(&endpoint);

        assert!(url.starts_with("ws://localhost:8080/gs-guide-websocket/"));
        assert!(url.ends_with("/websocket"));

        let segments: Vec<&str> = url.rsplit('/').collect();
        assert_eq!(segments[0], "websocket");
        assert_eq!(segments[1].len(), 8);
        assert_eq!(segments[2].len(), 3);
    }

    #[test]
    fn test_negotiated_url_trims_trailing_slash() {
        let endpoint = Url::parse("nats://localhost:4222").unwrap();
        let url = negotiated_url(&endpoint);
        assert!(url.starts_with("nats://localhost:4222/"));
        assert!(!url.contains("4222//"));
    }
}
