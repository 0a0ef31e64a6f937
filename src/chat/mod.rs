// Chat room demo: every member posts to one destination and hears one topic

use crate::error::Result;
use crate::session::{Session, SubscriptionHandle};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// A chat line as exchanged on the wire
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub emitter: String,
    pub content: String,
    /// Unix epoch milliseconds
    #[serde(rename = "emissionDate")]
    pub emission_date: i64,
}

impl ChatMessage {
    pub fn new(emitter: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            emitter: emitter.into(),
            content: content.into(),
            emission_date: Utc::now().timestamp_millis(),
        }
    }

    pub fn emitted_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.emission_date).single()
    }
}

/// Destinations used by the chat room
#[derive(Clone, Debug, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_destination")]
    pub destination: String,
    /// Name attached to messages posted from this process
    #[serde(default = "default_emitter")]
    pub emitter: String,
}

fn default_topic() -> String {
    "/chat_messages".to_string()
}

fn default_destination() -> String {
    "/app/message".to_string()
}

fn default_emitter() -> String {
    std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string())
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            destination: default_destination(),
            emitter: default_emitter(),
        }
    }
}

/// Rendering side of the chat room
pub trait ChatView: Send + Sync {
    fn show_message(&self, message: &ChatMessage);
}

/// Membership of one chat room on a connected [`Session`]
pub struct ChatRoom {
    session: Session,
    config: ChatConfig,
    subscription: SubscriptionHandle,
}

impl ChatRoom {
    /// Start listening to the room; the session must already be connected
    pub async fn join(
        session: Session,
        config: ChatConfig,
        view: Arc<dyn ChatView>,
    ) -> Result<Self> {
        let subscription = session
            .subscribe_as(&config.topic, move |message: ChatMessage| {
                view.show_message(&message)
            })
            .await?;

        info!(topic = %config.topic, emitter = %config.emitter, "Joined chat room");

        Ok(Self {
            session,
            config,
            subscription,
        })
    }

    /// Post a line under the configured emitter name
    pub async fn post(&self, content: &str) -> Result<()> {
        self.post_as(&self.config.emitter, content).await
    }

    pub async fn post_as(&self, emitter: &str, content: &str) -> Result<()> {
        self.session
            .send(&self.config.destination, &ChatMessage::new(emitter, content))
            .await
    }

    pub fn is_joined(&self) -> bool {
        self.subscription.is_active()
    }

    /// Stop listening; the session stays connected
    pub async fn leave(self) -> Result<()> {
        info!(topic = %self.config.topic, "Leaving chat room");
        self.subscription.unsubscribe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBroker;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingView {
        messages: Mutex<Vec<ChatMessage>>,
    }

    impl ChatView for RecordingView {
        fn show_message(&self, message: &ChatMessage) {
            self.messages.lock().unwrap().push(message.clone());
        }
    }

    fn test_config() -> ChatConfig {
        ChatConfig {
            emitter: "ada".to_string(),
            ..ChatConfig::default()
        }
    }

    /// Relays posts to the room topic, like the demo server does
    fn install_relay(broker: &MemoryBroker, config: &ChatConfig) {
        let relay = broker.clone();
        let topic = config.topic.clone();
        broker.listen(
            &config.destination,
            Arc::new(move |body: String| {
                relay.publish(&topic, body);
            }),
        );
    }

    #[test]
    fn test_wire_format_uses_emission_date() {
        let message = ChatMessage {
            emitter: "ada".to_string(),
            content: "hi".to_string(),
            emission_date: 1707668400000,
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["emissionDate"], 1707668400000i64);
        assert_eq!(
            message.emitted_at().unwrap().to_rfc3339(),
            "2024-02-11T16:20:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_post_reaches_room() {
        let broker = MemoryBroker::new();
        let config = test_config();
        install_relay(&broker, &config);
        let session = Session::open(Arc::new(broker.transport()), "ws://localhost:8080/chat")
            .await
            .unwrap();
        let view = Arc::new(RecordingView::default());

        let room = ChatRoom::join(session, config, view.clone()).await.unwrap();
        room.post("hello room").await.unwrap();
        room.post_as("bob", "hi ada").await.unwrap();

        let messages = view.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].emitter, "ada");
        assert_eq!(messages[0].content, "hello room");
        assert_eq!(messages[1].emitter, "bob");
        assert!(messages[0].emission_date > 0);
    }

    #[tokio::test]
    async fn test_join_requires_connected_session() {
        let broker = MemoryBroker::new();
        let session = Session::new(Arc::new(broker.transport()), "ws://localhost:8080/chat").unwrap();

        let err = ChatRoom::join(session, test_config(), Arc::new(RecordingView::default()))
            .await
            .err()
            .unwrap();

        assert!(err.is_invalid_state());
    }

    #[tokio::test]
    async fn test_leave_keeps_session_connected() {
        let broker = MemoryBroker::new();
        let config = test_config();
        install_relay(&broker, &config);
        let session = Session::open(Arc::new(broker.transport()), "ws://localhost:8080/chat")
            .await
            .unwrap();
        let view = Arc::new(RecordingView::default());

        let room = ChatRoom::join(session.clone(), config, view.clone()).await.unwrap();
        assert!(room.is_joined());
        room.leave().await.unwrap();
        broker.publish("/chat_messages", r#"{"emitter":"bob","content":"hi","emissionDate":1}"#);

        assert!(session.is_connected());
        assert!(view.messages.lock().unwrap().is_empty());
    }
}
