use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dispatch_core::geo::HaversineDistance;
use dispatch_db::{PgDispatchStore, PgProviderDirectory};
use dispatch_engine::DispatchEngine;
use dispatch_events::{EventBus, EventPersistence};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dispatch_api::config::ServerConfig;
use dispatch_api::router::build_app_router;
use dispatch_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dispatch_api=debug,dispatch_engine=debug,tower_http=debug".into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        offer_timeout_secs = config.dispatch.offer_timeout.as_secs(),
        "Loaded server configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = dispatch_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    dispatch_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    dispatch_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let persistence_handle = tokio::spawn(EventPersistence::run(
        pool.clone(),
        event_bus.subscribe(),
    ));
    tracing::info!("Event persistence started");

    // --- Dispatch engine ---
    let engine = Arc::new(DispatchEngine::new(
        Arc::new(PgDispatchStore::new(pool.clone())),
        Arc::new(PgProviderDirectory::new(pool.clone())),
        Arc::new(HaversineDistance),
        Arc::clone(&event_bus),
        config.dispatch.clone(),
    ));
    match engine.recover_timers().await {
        Ok(armed) => tracing::info!(armed, "Pending offers recovered"),
        Err(e) => tracing::error!(error = %e, "Failed to recover pending offers"),
    }

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        engine: Arc::clone(&engine),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Pending attempts stay PENDING and are re-armed on the next start.
    engine.shutdown();
    drop(engine);

    // Dropping the last sender closes the channel and ends persistence.
    drop(event_bus);
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(drain, persistence_handle).await.is_err() {
        tracing::warn!("Event persistence did not drain in time");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
