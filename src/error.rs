use crate::session::ConnectionState;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors reported by session operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// The transport could not establish (or keep) a connection
    #[error("connection to '{endpoint}' failed: {reason}")]
    Connection { endpoint: String, reason: String },

    /// Operation attempted while the session was in the wrong state
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// Payload could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl SessionError {
    pub(crate) fn connection(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        SessionError::Connection {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn from_transport(endpoint: impl Into<String>, err: TransportError) -> Self {
        SessionError::connection(endpoint, err.to_string())
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, SessionError::Connection { .. })
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SessionError::InvalidState { .. })
    }

    pub fn is_serialization(&self) -> bool {
        matches!(self, SessionError::Serialization(_))
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
