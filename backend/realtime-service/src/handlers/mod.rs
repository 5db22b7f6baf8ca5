//! HTTP entry points for collaborator services.
//!
//! Backend domain logic (job postings, conversations, profile CRUD) targets
//! a user through these routes instead of linking against the broadcaster
//! directly. Every POST reports the delivery outcome in the body but always
//! answers 200 for an offline user: delivery is best-effort by contract.

use std::sync::Arc;

use actix_web::{web, HttpResponse, Result as ActixResult};
use realtime_events::{BadgeCounts, Notification, UserId};
use serde::Deserialize;
use serde_json::json;

use crate::services::EventBroadcaster;
use crate::websocket::ConnectionRegistry;

#[derive(Debug, Deserialize)]
pub struct NewMessageBody {
    pub message: serde_json::Value,
    pub sender: serde_json::Value,
    pub conversation_id: i64,
}

/// GET /api/v1/realtime/status/{user_id}
pub async fn connection_status(
    path: web::Path<UserId>,
    registry: web::Data<ConnectionRegistry>,
) -> ActixResult<HttpResponse> {
    let user_id = path.into_inner();
    let connected = registry.is_connected(user_id).await;
    let connected_since = registry.connected_since(user_id).await;

    Ok(HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "connected": connected,
        "connected_since": connected_since,
    })))
}

/// GET /api/v1/realtime/stats
pub async fn connection_stats(
    registry: web::Data<ConnectionRegistry>,
) -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "connected_users": registry.connection_count().await,
    })))
}

/// POST /api/v1/realtime/notify/{user_id}
pub async fn notify_user(
    path: web::Path<UserId>,
    broadcaster: web::Data<Arc<EventBroadcaster>>,
    body: web::Json<Notification>,
) -> ActixResult<HttpResponse> {
    let user_id = path.into_inner();
    let outcome = broadcaster.notify(user_id, body.into_inner()).await;

    Ok(HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "outcome": outcome,
    })))
}

/// POST /api/v1/realtime/badge-counts/{user_id}
pub async fn push_badge_counts(
    path: web::Path<UserId>,
    broadcaster: web::Data<Arc<EventBroadcaster>>,
    body: web::Json<BadgeCounts>,
) -> ActixResult<HttpResponse> {
    let user_id = path.into_inner();
    let outcome = broadcaster
        .update_badge_counts(user_id, body.into_inner())
        .await;

    Ok(HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "outcome": outcome,
    })))
}

/// POST /api/v1/realtime/messages/{user_id}
pub async fn push_new_message(
    path: web::Path<UserId>,
    broadcaster: web::Data<Arc<EventBroadcaster>>,
    body: web::Json<NewMessageBody>,
) -> ActixResult<HttpResponse> {
    let user_id = path.into_inner();
    let body = body.into_inner();
    let outcome = broadcaster
        .notify_new_message(user_id, body.message, body.sender, body.conversation_id)
        .await;

    Ok(HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "outcome": outcome,
    })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/realtime")
            .route("/status/{user_id}", web::get().to(connection_status))
            .route("/stats", web::get().to(connection_stats))
            .route("/notify/{user_id}", web::post().to(notify_user))
            .route("/badge-counts/{user_id}", web::post().to(push_badge_counts))
            .route("/messages/{user_id}", web::post().to(push_new_message)),
    );
}
