use super::models::{Greeting, HelloMessage};
use super::session_id::extract_session_id;
use super::GreetingConfig;
use crate::error::{Result, SessionError};
use crate::session::{Session, SubscriptionHandle};
use std::sync::Arc;
use tracing::info;

/// Rendering side of the greeting demo.
///
/// Implementations decide how greetings are shown; nothing in this crate
/// builds markup.
pub trait GreetingView: Send + Sync {
    fn show_greeting(&self, content: &str);

    /// Called with `true` once subscribed and `false` after disconnecting
    fn set_connected(&self, connected: bool);
}

/// Greeting demo wired onto a [`Session`]: listens on the broadcast topic and
/// on the per-user topic, and sends names to be greeted.
pub struct GreetingClient {
    session: Session,
    config: GreetingConfig,
    session_id: String,
    subscriptions: Vec<SubscriptionHandle>,
    view: Arc<dyn GreetingView>,
}

impl GreetingClient {
    /// Connect `session` (if needed) and subscribe both greeting topics
    pub async fn connect(
        session: Session,
        config: GreetingConfig,
        view: Arc<dyn GreetingView>,
    ) -> Result<Self> {
        if !session.is_connected() {
            session.connect().await?;
        }

        match Self::subscribe_all(&session, &config, &view).await {
            Ok((session_id, subscriptions)) => {
                info!(session_id = %session_id, "Greeting client ready");
                view.set_connected(true);
                Ok(Self {
                    session,
                    config,
                    session_id,
                    subscriptions,
                    view,
                })
            }
            Err(e) => {
                session.disconnect().await;
                Err(e)
            }
        }
    }

    async fn subscribe_all(
        session: &Session,
        config: &GreetingConfig,
        view: &Arc<dyn GreetingView>,
    ) -> Result<(String, Vec<SubscriptionHandle>)> {
        let transport_url = session.transport_url().ok_or_else(|| {
            SessionError::connection(session.endpoint_url(), "no negotiated transport URL")
        })?;
        let session_id = extract_session_id(&transport_url)?;

        let mut subscriptions = Vec::with_capacity(2);
        for topic in [config.broadcast_topic.clone(), config.user_topic_for(&session_id)] {
            let view = Arc::clone(view);
            let handle = session
                .subscribe_as(&topic, move |greeting: Greeting| {
                    view.show_greeting(&greeting.content)
                })
                .await?;
            subscriptions.push(handle);
        }

        Ok((session_id, subscriptions))
    }

    /// Ask for a greeting broadcast to everyone
    pub async fn send_to_everyone(&self, name: &str) -> Result<()> {
        self.session
            .send(&self.config.everyone_destination, &HelloMessage::new(name))
            .await
    }

    /// Ask for a greeting delivered only to this session
    pub async fn send_to_user(&self, name: &str) -> Result<()> {
        self.session
            .send(&self.config.user_destination, &HelloMessage::new(name))
            .await
    }

    /// Transport session id the per-user topic was derived from
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn topics(&self) -> Vec<&str> {
        self.subscriptions.iter().map(|s| s.topic()).collect()
    }

    pub async fn disconnect(self) {
        self.session.disconnect().await;
        self.view.set_connected(false);
    }
}
