use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conveyor_orchestrator::config::OrchestratorConfig;
use conveyor_orchestrator::engine::blue_green::HttpDeployTarget;
use conveyor_orchestrator::engine::notifier::{LogSink, NotificationSink, WebhookSink};
use conveyor_orchestrator::engine::{Engine, EngineConfig};
use conveyor_orchestrator::{api, db};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Conveyor Orchestrator...");

    let config = OrchestratorConfig::from_env().expect("Invalid configuration");

    tracing::info!("Connecting to database...");

    // Create database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    tracing::info!("Database connection pool created");

    // Run migrations
    db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let mut builder = Engine::builder(pool, EngineConfig::from(&config)).default_handlers();
    if let Some(url) = &config.deploy_target_url {
        tracing::info!("Using deploy target at {}", url);
        let target = HttpDeployTarget::new(url.clone(), config.deploy_target_timeout)
            .expect("Failed to create deploy target client");
        builder = builder.deploy_target("default", Arc::new(target));
    }
    let engine = builder.build();

    let sink: Arc<dyn NotificationSink> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone())),
        None => Arc::new(LogSink),
    };
    engine.start_notifier(sink, config.notify_recipient.clone());

    engine
        .recover()
        .await
        .expect("Failed to recover interrupted executions");

    // Build router with all API endpoints
    let app = api::create_router(engine);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
