//! Wire schema for the Workbay real-time event-delivery layer.
//!
//! One JSON text frame per logical event; every frame carries a `type`
//! string discriminant. The schema is shared by `realtime-service` (server)
//! and `realtime-client` so both sides agree on frame shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Already-authenticated user identifier (issued by the auth collaborator).
pub type UserId = i64;

/// Frames sent by the client over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Sent immediately after the transport opens; binds the connection
    /// to the user in the server's registry.
    Authenticate { user_id: UserId },
}

/// A notification as carried inside a `new_notification` frame.
///
/// Fields beyond the known ones pass through untouched so the backend can
/// grow the payload without a client release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    pub message: String,
    pub category: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Aggregate unread counts: one integer per category plus a running total.
///
/// Serializes flat, e.g. `{"feedback": 5, "contact_messages": 2, "total": 7}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BadgeCounts {
    pub total: i64,
    #[serde(flatten)]
    pub categories: BTreeMap<String, i64>,
}

impl BadgeCounts {
    pub fn category(&self, name: &str) -> i64 {
        self.categories.get(name).copied().unwrap_or(0)
    }
}

/// Frames pushed by the server, discriminated by `type`.
///
/// Unknown discriminants decode into [`ServerEvent::Opaque`] so newer
/// server-side event types are forwarded to generic subscribers instead of
/// breaking older clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    NewNotification {
        notification: Notification,
    },
    BadgeCountsUpdate {
        counts: BadgeCounts,
    },
    NewMessage {
        message: Value,
        sender: Value,
        conversation_id: i64,
    },
    /// Acknowledgement emitted by the server after a successful authenticate.
    Connected {
        user_id: UserId,
        timestamp: i64,
    },
    /// Forward-compatible catch-all. `payload` is the whole original frame,
    /// `type` tag included, so re-encoding round-trips.
    Opaque {
        event_type: String,
        payload: Value,
    },
}

const KNOWN_EVENT_TYPES: &[&str] = &[
    "new_notification",
    "badge_counts_update",
    "new_message",
    "connected",
];

impl ServerEvent {
    pub fn connected(user_id: UserId) -> Self {
        ServerEvent::Connected {
            user_id,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Discriminant string as it appears on the wire.
    pub fn event_type(&self) -> &str {
        match self {
            ServerEvent::NewNotification { .. } => "new_notification",
            ServerEvent::BadgeCountsUpdate { .. } => "badge_counts_update",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::Opaque { event_type, .. } => event_type,
        }
    }

    /// Decode one inbound frame.
    ///
    /// Known `type` tags deserialize into their typed variant; any other tag
    /// becomes `Opaque`. A frame without a `type` string is an error and
    /// must be discarded by the caller (the connection stays open).
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(frame)?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?;

        if KNOWN_EVENT_TYPES.contains(&tag) {
            Ok(serde_json::from_value(value)?)
        } else {
            Ok(ServerEvent::Opaque {
                event_type: tag.to_string(),
                payload: value,
            })
        }
    }

    /// Serialize to a single wire frame. Opaque events re-emit their
    /// original payload verbatim.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        match self {
            ServerEvent::Opaque { payload, .. } => serde_json::to_string(payload),
            other => serde_json::to_string(other),
        }
    }
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no `type` discriminant")]
    MissingType,
}
