use std::env;
use std::time::Duration;

/// Route path of the notifications-admin view. Badge suppression only
/// applies while the UI reports this path.
pub const NOTIFICATIONS_ADMIN_PATH: &str = "/admin";

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8080/ws`.
    pub ws_url: String,
    /// Base URL for collaborator HTTP endpoints, e.g. `http://localhost:8080`.
    pub api_base: String,
    /// Fixed delay between reconnect attempts. There is deliberately no
    /// backoff or attempt cap for this single-tab client.
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(ws_url: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            api_base: api_base.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn from_env() -> Self {
        let ws_url =
            env::var("REALTIME_WS_URL").unwrap_or_else(|_| "ws://localhost:8080/ws".into());
        let api_base =
            env::var("REALTIME_API_BASE").unwrap_or_else(|_| "http://localhost:8080".into());
        let reconnect_delay = env::var("REALTIME_RECONNECT_DELAY_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RECONNECT_DELAY);

        Self {
            ws_url,
            api_base,
            reconnect_delay,
        }
    }
}
