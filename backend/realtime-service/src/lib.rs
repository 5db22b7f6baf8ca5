pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod services;
pub mod websocket;

use std::sync::Arc;

use actix_web::web;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use services::EventBroadcaster;
pub use websocket::{ConnectionRegistry, DeliveryOutcome};

/// Wire up the full HTTP surface: the `/ws` upgrade endpoint, the ops
/// routes, and liveness/metrics. Used by `main` and by integration tests
/// that mount the real app on an ephemeral port.
pub fn configure_app(
    cfg: &mut web::ServiceConfig,
    registry: ConnectionRegistry,
    broadcaster: Arc<EventBroadcaster>,
    config: Config,
) {
    cfg.app_data(web::Data::new(registry))
        .app_data(web::Data::new(broadcaster))
        .app_data(web::Data::new(config))
        .route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(metrics::serve_metrics))
        .route("/ws", web::get().to(websocket::session::ws_route))
        .configure(handlers::register_routes);
}
