// Messaging session manager: one connection, its subscriptions and sends

mod events;
mod manager;
mod state;
mod subscription;

pub use events::SessionEvents;
pub use manager::Session;
pub use state::ConnectionState;
pub use subscription::SubscriptionHandle;
