//! Client half of the Workbay real-time event-delivery layer.
//!
//! One persistent WebSocket per logged-in user multiplexes notifications,
//! message-arrival events, and badge-count updates. The client owns the
//! connection lifecycle (authenticate handshake, fixed-delay reconnect,
//! teardown on identity change), deduplicates notifications, fans every
//! accepted event out to subscribers, and reconciles badge counts against
//! the view the user is currently on.
//!
//! ```no_run
//! use realtime_client::{ClientConfig, RealtimeClient, ViewContext};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), realtime_client::ClientError> {
//! let client = RealtimeClient::new(ClientConfig::new(
//!     "ws://localhost:8080/ws",
//!     "http://localhost:8080",
//! ))?;
//!
//! let _subscription = client.subscribe(|event| {
//!     println!("event: {}", event.event_type());
//! });
//!
//! client.set_identity(42);
//! client.set_view_context(ViewContext::new("/admin", "#feedback"));
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod badge;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod invalidation;

use std::sync::Arc;

use realtime_events::{BadgeCounts, ClientFrame, ServerEvent, UserId};
use tokio::sync::watch;

pub use api::{HttpNotificationApi, NotificationApi};
pub use badge::{BadgeReconciler, ViewContext};
pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatcher::{EventDispatcher, SubscriptionHandle};
pub use error::ClientError;
pub use invalidation::{CacheInvalidator, CacheTarget, NoopInvalidator};

/// Facade over the connection manager, the dedup/fan-out dispatcher, and
/// the badge reconciler. Dropping the client tears the session down.
pub struct RealtimeClient {
    dispatcher: Arc<EventDispatcher>,
    badges: Arc<BadgeReconciler>,
    connection: ConnectionManager,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_invalidator(config, Arc::new(NoopInvalidator))
    }

    /// Build a client whose built-in reactions signal the given cache.
    pub fn with_invalidator(
        config: ClientConfig,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Result<Self, ClientError> {
        if !config.ws_url.starts_with("ws://") && !config.ws_url.starts_with("wss://") {
            return Err(ClientError::InvalidWsUrl(config.ws_url));
        }

        let config = Arc::new(config);
        let dispatcher = Arc::new(EventDispatcher::new(invalidator));
        let badges = Arc::new(BadgeReconciler::new(Arc::new(HttpNotificationApi::new(
            config.api_base.clone(),
        ))));
        let connection =
            ConnectionManager::new(config, dispatcher.clone(), badges.clone());

        Ok(Self {
            dispatcher,
            badges,
            connection,
        })
    }

    /// Start (or restart, on identity switch) the session for a user.
    pub fn set_identity(&self, user_id: UserId) {
        self.connection.set_identity(user_id);
    }

    /// Logout: full teardown, no reconnect.
    pub fn clear_identity(&self) {
        self.connection.clear_identity();
    }

    /// Register a callback for every accepted inbound event. The returned
    /// handle unsubscribes; cancelling is idempotent.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(callback)
    }

    /// Reconciled badge counts for badge UI.
    pub fn badge_counts(&self) -> watch::Receiver<BadgeCounts> {
        self.badges.counts()
    }

    /// Tell the reconciler where the user is. Call on every navigation.
    pub fn set_view_context(&self, context: ViewContext) {
        self.badges.set_view_context(context);
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_changes()
    }

    /// Queue a frame for the server; warns and drops unless connected.
    pub fn send(&self, frame: ClientFrame) {
        self.connection.send(frame);
    }
}
