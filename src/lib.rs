// Session errors
pub mod error;

// Messaging session manager
pub mod session;

// Transport collaborators (memory, NATS)
pub mod transport;

// Greeting demo facade
pub mod greeting;

// Chat room facade
pub mod chat;

// Configuration
pub mod config;

pub use error::SessionError;
pub use session::{ConnectionState, Session, SessionEvents, SubscriptionHandle};
