use serde::{Deserialize, Serialize};

/// Outbound request: ask to be greeted by name
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub name: String,
}

impl HelloMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Inbound greeting published on the greeting topics
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Greeting {
    pub content: String,
}

/// Reply a responder sends to the user who asked to be greeted
pub fn greeting_for(name: &str) -> Greeting {
    Greeting {
        content: format!("Hello, {}!", escape_html(name)),
    }
}

/// Reply a responder publishes to everyone on the broadcast topic
pub fn broadcast_greeting_for(name: &str) -> Greeting {
    Greeting {
        content: format!("Hello everyone, I am {}!", escape_html(name)),
    }
}

// Names are rendered as markup by browser clients
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
