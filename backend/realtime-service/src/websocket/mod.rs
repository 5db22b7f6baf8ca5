use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use realtime_events::{ServerEvent, UserId};
use serde::Serialize;
use tokio::sync::{mpsc::UnboundedSender, RwLock};
use uuid::Uuid;

pub mod session;

/// Unique identifier for one registered WebSocket connection.
///
/// Lets a stale session that closes late prove it still owns its registry
/// entry before evicting it, so it never tears down its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a best-effort targeted send. Never an error: delivery is
/// at-most-once and fire-and-forget, so callers get a status, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Frame handed to the connection's channel.
    Delivered,
    /// No live connection registered for the user.
    NotConnected,
    /// The registered channel was closed; the stale entry has been dropped.
    ChannelClosed,
    /// Broadcast attempted before the registry was attached.
    NotReady,
    /// The event could not be serialized to a frame.
    EncodeFailed,
}

struct RegisteredConnection {
    id: ConnectionId,
    sender: UnboundedSender<String>,
    connected_at: DateTime<Utc>,
}

/// Registry of live WebSocket connections, one per user.
///
/// Shared process-wide by injection: constructed once at startup and handed
/// to the HTTP app and the broadcaster. Registering for a user only ever
/// replaces that user's own entry (last-connect-wins), so the RwLock'd map
/// is all the synchronization needed.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<UserId, RegisteredConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user, silently replacing any existing
    /// one. The replaced handle is not closed; it is simply no longer
    /// reachable via targeted sends.
    pub async fn register(&self, user_id: UserId, sender: UnboundedSender<String>) -> ConnectionId {
        let id = ConnectionId::new();
        let mut guard = self.inner.write().await;
        let replaced = guard
            .insert(
                user_id,
                RegisteredConnection {
                    id,
                    sender,
                    connected_at: Utc::now(),
                },
            )
            .is_some();
        crate::metrics::set_connected_users(guard.len());
        drop(guard);

        if replaced {
            tracing::debug!(user_id, "replaced existing connection (last-connect-wins)");
        } else {
            tracing::debug!(user_id, "registered connection");
        }
        id
    }

    /// Remove the mapping for a user, but only if `connection_id` still owns
    /// it. A session closing after it was replaced is a no-op here.
    pub async fn unregister(&self, user_id: UserId, connection_id: ConnectionId) {
        let mut guard = self.inner.write().await;
        if guard.get(&user_id).map(|c| c.id) == Some(connection_id) {
            guard.remove(&user_id);
            tracing::debug!(user_id, "unregistered connection");
        }
        crate::metrics::set_connected_users(guard.len());
    }

    /// Serialize `event` as one frame and hand it to the user's connection.
    ///
    /// Degrades to a logged no-op when the user is not connected or the
    /// channel is already closed; a closed channel drops the stale entry.
    pub async fn send(&self, user_id: UserId, event: &ServerEvent) -> DeliveryOutcome {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(user_id, error = %e, event_type = event.event_type(),
                    "failed to encode event frame");
                return self.record(event, DeliveryOutcome::EncodeFailed);
            }
        };

        let guard = self.inner.read().await;
        let Some(connection) = guard.get(&user_id) else {
            tracing::warn!(user_id, event_type = event.event_type(),
                "dropping event: user not connected");
            return self.record(event, DeliveryOutcome::NotConnected);
        };

        if connection.sender.send(frame).is_ok() {
            return self.record(event, DeliveryOutcome::Delivered);
        }

        let stale_id = connection.id;
        drop(guard);

        tracing::warn!(user_id, event_type = event.event_type(),
            "dropping event: connection channel closed");
        self.unregister(user_id, stale_id).await;
        self.record(event, DeliveryOutcome::ChannelClosed)
    }

    fn record(&self, event: &ServerEvent, outcome: DeliveryOutcome) -> DeliveryOutcome {
        crate::metrics::observe_event_send(event.event_type(), outcome);
        outcome
    }

    pub async fn is_connected(&self, user_id: UserId) -> bool {
        self.inner.read().await.contains_key(&user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn connected_users(&self) -> Vec<UserId> {
        let guard = self.inner.read().await;
        guard.keys().copied().collect()
    }

    pub async fn connected_since(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        self.inner.read().await.get(&user_id).map(|c| c.connected_at)
    }
}
