use super::*;
use crate::session::{ConnectionState, Session};
use crate::transport::{
    LostCallback, MemoryBroker, MessageCallback, Transport, TransportClient, TransportError,
    TransportSubscriptionId,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use url::Url;

const ENDPOINT: &str = "ws://localhost:8080/gs-guide-websocket";

#[derive(Default)]
struct RecordingView {
    greetings: Mutex<Vec<String>>,
    connected: Mutex<Vec<bool>>,
}

impl GreetingView for RecordingView {
    fn show_greeting(&self, content: &str) {
        self.greetings.lock().unwrap().push(content.to_string());
    }

    fn set_connected(&self, connected: bool) {
        self.connected.lock().unwrap().push(connected);
    }
}

/// Answers hello requests on the broadcast topic, like the demo server does
fn install_responder(broker: &MemoryBroker, config: &GreetingConfig) {
    let responder = broker.clone();
    let topic = config.broadcast_topic.clone();
    broker.listen(
        &config.everyone_destination,
        Arc::new(move |body: String| {
            let hello: HelloMessage = serde_json::from_str(&body).unwrap();
            let reply = serde_json::to_string(&broadcast_greeting_for(&hello.name)).unwrap();
            responder.publish(&topic, reply);
        }),
    );
}

async fn connect_client(broker: &MemoryBroker) -> (GreetingClient, Arc<RecordingView>) {
    let view = Arc::new(RecordingView::default());
    let session = Session::new(Arc::new(broker.transport()), ENDPOINT).unwrap();
    let client = GreetingClient::connect(session, GreetingConfig::default(), view.clone())
        .await
        .unwrap();
    (client, view)
}

#[test]
fn test_greeting_for() {
    assert_eq!(greeting_for("Ada").content, "Hello, Ada!");
    assert_eq!(
        broadcast_greeting_for("Ada").content,
        "Hello everyone, I am Ada!"
    );
}

#[test]
fn test_greeting_escapes_markup_in_name() {
    assert_eq!(
        broadcast_greeting_for("<b>Ada</b>").content,
        "Hello everyone, I am &lt;b&gt;Ada&lt;/b&gt;!"
    );
    assert_eq!(
        greeting_for(r#"Tom & "Jerry's""#).content,
        "Hello, Tom &amp; &quot;Jerry&#39;s&quot;!"
    );
}

#[test]
fn test_user_topic_for() {
    let config = GreetingConfig::default();
    assert_eq!(
        config.user_topic_for("14pckehf"),
        "/user/14pckehf/topic/greetings"
    );
}

#[tokio::test]
async fn test_connect_subscribes_broadcast_and_user_topics() {
    let broker = MemoryBroker::new();
    let (client, view) = connect_client(&broker).await;

    let user_topic = format!("/user/{}/topic/greetings", client.session_id());
    assert_eq!(client.topics(), vec!["/topic/greetings", user_topic.as_str()]);
    assert_eq!(broker.subscriber_count("/topic/greetings"), 1);
    assert_eq!(broker.subscriber_count(&user_topic), 1);
    assert_eq!(*view.connected.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn test_send_to_everyone_round_trip() {
    let broker = MemoryBroker::new();
    install_responder(&broker, &GreetingConfig::default());
    let (client, view) = connect_client(&broker).await;

    client.send_to_everyone("Ada").await.unwrap();

    assert_eq!(*view.greetings.lock().unwrap(), vec!["Hello everyone, I am Ada!"]);
}

#[tokio::test]
async fn test_user_topic_greetings_reach_only_that_session() {
    let broker = MemoryBroker::new();
    let (alice, alice_view) = connect_client(&broker).await;
    let (_bob, bob_view) = connect_client(&broker).await;

    let user_topic = GreetingConfig::default().user_topic_for(alice.session_id());
    broker.publish(&user_topic, r#"{"content":"Hello, Alice!"}"#);

    assert_eq!(*alice_view.greetings.lock().unwrap(), vec!["Hello, Alice!"]);
    assert!(bob_view.greetings.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_send_to_user_uses_user_destination() {
    let broker = MemoryBroker::new();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&requests);
    broker.listen(
        "/app/hello/user",
        Arc::new(move |body: String| sink.lock().unwrap().push(body)),
    );
    let (client, _) = connect_client(&broker).await;

    client.send_to_user("Ada").await.unwrap();

    assert_eq!(*requests.lock().unwrap(), vec![r#"{"name":"Ada"}"#]);
}

#[tokio::test]
async fn test_disconnect_releases_session() {
    let broker = MemoryBroker::new();
    let (client, view) = connect_client(&broker).await;
    let session = client.session().clone();

    client.disconnect().await;

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(broker.subscriber_count("/topic/greetings"), 0);
    assert_eq!(*view.connected.lock().unwrap(), vec![true, false]);

    let err = session
        .send("/app/hello/everyone", &HelloMessage::new("Ada"))
        .await
        .unwrap_err();
    assert!(err.is_invalid_state());
}

/// Memory client that reports the bare endpoint as its negotiated URL
struct UnnegotiatedClient {
    inner: Arc<dyn TransportClient>,
    url: String,
}

#[async_trait]
impl TransportClient for UnnegotiatedClient {
    fn transport_url(&self) -> &str {
        &self.url
    }

    async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<TransportSubscriptionId, TransportError> {
        self.inner.subscribe(topic, on_message).await
    }

    async fn unsubscribe(&self, id: TransportSubscriptionId) -> Result<(), TransportError> {
        self.inner.unsubscribe(id).await
    }

    async fn publish(&self, destination: &str, body: String) -> Result<(), TransportError> {
        self.inner.publish(destination, body).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

struct UnnegotiatedTransport {
    broker: MemoryBroker,
}

#[async_trait]
impl Transport for UnnegotiatedTransport {
    async fn open(
        &self,
        endpoint: &Url,
        on_lost: LostCallback,
    ) -> Result<Arc<dyn TransportClient>, TransportError> {
        let inner = self.broker.transport().open(endpoint, on_lost).await?;
        Ok(Arc::new(UnnegotiatedClient {
            inner,
            url: endpoint.to_string(),
        }))
    }
}

#[tokio::test]
async fn test_missing_session_id_fails_connect() {
    let broker = MemoryBroker::new();
    let session = Session::new(
        Arc::new(UnnegotiatedTransport {
            broker: broker.clone(),
        }),
        "nats://localhost:4222",
    )
    .unwrap();
    let view = Arc::new(RecordingView::default());

    let err = GreetingClient::connect(session.clone(), GreetingConfig::default(), view.clone())
        .await
        .err()
        .unwrap();

    assert!(err.is_connection());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(broker.client_count(), 0);
    assert!(view.connected.lock().unwrap().is_empty());
}
