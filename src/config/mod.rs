use serde::Deserialize;

// Re-export section types owned by their modules
pub use crate::chat::ChatConfig;
pub use crate::greeting::GreetingConfig;

/// Complete messenger configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessengerConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub greeting: GreetingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Which transport implementation to open sessions with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process broker (offline demo)
    Memory,
    /// Core NATS publish/subscribe
    Nats,
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_kind")]
    pub kind: TransportKind,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_kind() -> TransportKind {
    TransportKind::Nats
}

fn default_endpoint() -> String {
    std::env::var("MESSENGER_ENDPOINT").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            endpoint: default_endpoint(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<MessengerConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: MessengerConfig = toml::from_str(&contents)?;
    Ok(config)
}
