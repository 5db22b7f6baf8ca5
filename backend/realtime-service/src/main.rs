use std::sync::Arc;

use actix_web::{middleware, App, HttpServer};
use realtime_service::{configure_app, logging, metrics, Config, ConnectionRegistry, EventBroadcaster};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let config = Config::from_env()?;

    // Process-wide state, constructed once and handed to the app by
    // injection. The broadcaster is attached exactly once here.
    let registry = ConnectionRegistry::new();
    let broadcaster = Arc::new(EventBroadcaster::new());
    broadcaster.attach_registry(registry.clone());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, "starting realtime-service");

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .configure(|cfg| {
                configure_app(cfg, registry.clone(), broadcaster.clone(), config.clone())
            })
    })
    .bind(&addr)?
    .run()
    .await?;

    Ok(())
}
