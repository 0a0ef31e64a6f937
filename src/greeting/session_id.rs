use crate::error::{Result, SessionError};
use once_cell::sync::Lazy;
use regex::Regex;

static SESSION_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/([^/]+)/websocket").unwrap());

/// Extract the transport session id from a negotiated URL such as
/// `ws://localhost:8080/gs-guide-websocket/791/14pckehf/websocket`.
pub fn extract_session_id(transport_url: &str) -> Result<String> {
    SESSION_ID_RE
        .captures(transport_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            SessionError::connection(transport_url, "no session id in negotiated transport URL")
        })
}
