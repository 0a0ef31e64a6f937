use crate::error::SessionError;
use std::fmt;
use std::sync::Arc;

pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;
pub type OnDisconnectCallback = Arc<dyn Fn(Option<&str>) + Send + Sync>;
pub type OnErrorCallback = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// Optional lifecycle hooks for a session.
///
/// `on_disconnect` receives the loss reason when the transport dropped, or
/// `None` for a requested disconnect. `on_error` sees failures that have no
/// caller to return to: connect failures and payloads that fail to decode.
#[derive(Clone, Default)]
pub struct SessionEvents {
    on_connect: Option<OnConnectCallback>,
    on_disconnect: Option<OnDisconnectCallback>,
    on_error: Option<OnErrorCallback>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SessionError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub(crate) fn emit_connect(&self) {
        if let Some(callback) = &self.on_connect {
            callback();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: Option<&str>) {
        if let Some(callback) = &self.on_disconnect {
            callback(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: &SessionError) {
        if let Some(callback) = &self.on_error {
            callback(error);
        }
    }
}

impl fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEvents")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
