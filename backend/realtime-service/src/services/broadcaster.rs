use once_cell::sync::OnceCell;
use realtime_events::{BadgeCounts, Notification, ServerEvent, UserId};
use serde_json::Value;

use crate::websocket::{ConnectionRegistry, DeliveryOutcome};

/// Typed event constructors over [`ConnectionRegistry::send`].
///
/// Domain code calls these without knowing anything about transports. The
/// broadcaster is constructed unwired and attached to the registry exactly
/// once at startup; until then every call logs a warning and drops the
/// event, so domain logic never fails because the real-time layer is
/// unavailable.
#[derive(Default)]
pub struct EventBroadcaster {
    registry: OnceCell<ConnectionRegistry>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the broadcaster to the registry. Call once at process start;
    /// a second attach is rejected and logged.
    pub fn attach_registry(&self, registry: ConnectionRegistry) {
        if self.registry.set(registry).is_err() {
            tracing::warn!("EventBroadcaster already attached to a registry, ignoring");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.registry.get().is_some()
    }

    /// Push a `new_notification` event to one user.
    pub async fn notify(&self, user_id: UserId, notification: Notification) -> DeliveryOutcome {
        self.send(
            user_id,
            ServerEvent::NewNotification { notification },
        )
        .await
    }

    /// Push a `badge_counts_update` event to one user.
    pub async fn update_badge_counts(
        &self,
        user_id: UserId,
        counts: BadgeCounts,
    ) -> DeliveryOutcome {
        self.send(user_id, ServerEvent::BadgeCountsUpdate { counts })
            .await
    }

    /// Push a `new_message` event to one user.
    pub async fn notify_new_message(
        &self,
        user_id: UserId,
        message: Value,
        sender: Value,
        conversation_id: i64,
    ) -> DeliveryOutcome {
        self.send(
            user_id,
            ServerEvent::NewMessage {
                message,
                sender,
                conversation_id,
            },
        )
        .await
    }

    async fn send(&self, user_id: UserId, event: ServerEvent) -> DeliveryOutcome {
        match self.registry.get() {
            Some(registry) => registry.send(user_id, &event).await,
            None => {
                tracing::warn!(user_id, event_type = event.event_type(),
                    "dropping event: broadcaster not attached to a registry");
                crate::metrics::observe_event_send(event.event_type(), DeliveryOutcome::NotReady);
                DeliveryOutcome::NotReady
            }
        }
    }
}
