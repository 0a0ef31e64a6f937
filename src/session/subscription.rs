use super::manager::SessionInner;
use crate::error::{Result, SessionError};
use std::fmt;
use std::sync::Weak;
use tracing::info;

/// Handle to one topic subscription.
///
/// Dropping the handle does not unsubscribe; the subscription lives until
/// `unsubscribe` is called or its session disconnects.
pub struct SubscriptionHandle {
    id: u64,
    topic: String,
    epoch: u64,
    session: Weak<SessionInner>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: u64, topic: &str, epoch: u64, session: Weak<SessionInner>) -> Self {
        Self {
            id,
            topic: topic.to_string(),
            epoch,
            session,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// True while the owning session is still connected in the epoch this
    /// subscription was created in
    pub fn is_active(&self) -> bool {
        match self.session.upgrade() {
            Some(inner) => {
                inner.current_epoch() == self.epoch && inner.subscriptions.contains_key(&self.id)
            }
            None => false,
        }
    }

    /// Stop delivery to this subscription's handler.
    ///
    /// A no-op when the session has already disconnected.
    pub async fn unsubscribe(self) -> Result<()> {
        let inner = match self.session.upgrade() {
            Some(inner) => inner,
            None => return Ok(()),
        };

        let entry = match inner.subscriptions.remove(&self.id) {
            Some((_, entry)) if entry.epoch == self.epoch => entry,
            _ => return Ok(()),
        };

        info!(topic = %self.topic, subscription = self.id, "Unsubscribed");

        let client = match inner.client_for_epoch(self.epoch) {
            Some(client) => client,
            None => return Ok(()),
        };

        if let Some(transport_id) = entry.transport_id {
            client
                .unsubscribe(transport_id)
                .await
                .map_err(|e| SessionError::from_transport(inner.endpoint(), e))?;
        }

        Ok(())
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("epoch", &self.epoch)
            .finish()
    }
}
