// Greeting demo: hello requests out, greetings back on shared and per-user topics

mod client;
mod models;
mod session_id;
#[cfg(test)]
mod tests;

pub use client::{GreetingClient, GreetingView};
pub use models::{broadcast_greeting_for, greeting_for, Greeting, HelloMessage};
pub use session_id::extract_session_id;

use serde::Deserialize;

/// Destinations used by the greeting demo
#[derive(Clone, Debug, Deserialize)]
pub struct GreetingConfig {
    /// Topic every client hears greetings on
    #[serde(default = "default_broadcast_topic")]
    pub broadcast_topic: String,
    /// Per-user topic, prefixed with `/user/{session_id}`
    #[serde(default = "default_user_topic")]
    pub user_topic: String,
    #[serde(default = "default_everyone_destination")]
    pub everyone_destination: String,
    #[serde(default = "default_user_destination")]
    pub user_destination: String,
}

fn default_broadcast_topic() -> String {
    "/topic/greetings".to_string()
}

fn default_user_topic() -> String {
    "/topic/greetings".to_string()
}

fn default_everyone_destination() -> String {
    "/app/hello/everyone".to_string()
}

fn default_user_destination() -> String {
    "/app/hello/user".to_string()
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            broadcast_topic: default_broadcast_topic(),
            user_topic: default_user_topic(),
            everyone_destination: default_everyone_destination(),
            user_destination: default_user_destination(),
        }
    }
}

impl GreetingConfig {
    /// Per-user topic for a transport session id
    pub fn user_topic_for(&self, session_id: &str) -> String {
        format!("/user/{}{}", session_id, self.user_topic)
    }
}
